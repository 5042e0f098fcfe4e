use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use sqlx::postgres::{PgConnectOptions, PgSslMode};
use sqlx::ConnectOptions;
use thiserror::Error;

use crate::MaxConnections;

/// Invalid or unreadable database settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A setting could not be parsed.
    #[error("invalid value `{value}` for {key}")]
    InvalidValue { key: &'static str, value: String },

    /// A secret file could not be read.
    #[error("failed to read secret file {}", .path.display())]
    SecretFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `DATABASE_URL` is not a valid connection url.
    #[error("invalid database url")]
    InvalidUrl(#[source] sqlx::Error),
}

/// Connection settings for the shared database.
///
/// Built from environment variables with [`DatabaseConfig::from_env`] or
/// from a directory of mounted secrets with
/// [`DatabaseConfig::from_secret_files`]. When `url` is set it takes
/// precedence over the discrete host/port/name/user/password fields.
#[derive(Clone)]
pub struct DatabaseConfig {
    /// Full connection url, overriding the discrete fields
    pub url: Option<String>,
    /// Database host (default: `localhost`)
    pub host: String,
    /// Database port (default: 5432)
    pub port: u16,
    /// Database name
    pub name: String,
    /// Role to connect as
    pub username: String,
    /// Password for `username`; never logged
    pub password: Option<String>,
    /// `disable`, `allow`, `prefer`, `require`, `verify-ca` or `verify-full`
    pub ssl_mode: String,
    /// CA certificate for `verify-ca` / `verify-full`
    pub root_cert: Option<PathBuf>,
    /// Pool size
    pub max_connections: MaxConnections,
    /// Log every statement at debug level
    pub debug: bool,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("connection", &self.log_safe_connection_string())
            .field("max_connections", &self.max_connections)
            .field("debug", &self.debug)
            .finish()
    }
}

const DEFAULT_MAX_CONNECTIONS: NonZeroU32 = match NonZeroU32::new(50) {
    Some(v) => v,
    None => unreachable!(),
};

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 5432,
            name: "postgres".to_string(),
            username: "postgres".to_string(),
            password: None,
            ssl_mode: "disable".to_string(),
            root_cert: None,
            max_connections: MaxConnections::new(DEFAULT_MAX_CONNECTIONS),
            debug: false,
        }
    }
}

fn parse<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
    })
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
        }),
    }
}

fn read_secret(dir: &Path, file: &str) -> Result<String, ConfigError> {
    let path = dir.join(file);
    std::fs::read_to_string(&path)
        .map(|contents| contents.trim().to_string())
        .map_err(|source| ConfigError::SecretFile { path, source })
}

impl DatabaseConfig {
    /// Read `DATABASE_URL`, `DB_HOST`, `DB_PORT`, `DB_NAME`, `DB_USER`,
    /// `DB_PASSWORD`, `DB_SSLMODE`, `DB_ROOT_CERT`, `DB_MAX_CONNECTIONS` and
    /// `DB_DEBUG`. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self {
            url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            ..Self::default()
        };
        if let Some(host) = lookup("DB_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("DB_PORT") {
            config.port = parse("DB_PORT", &port)?;
        }
        if let Some(name) = lookup("DB_NAME") {
            config.name = name;
        }
        if let Some(username) = lookup("DB_USER") {
            config.username = username;
        }
        config.password = lookup("DB_PASSWORD").or(config.password);
        if let Some(ssl_mode) = lookup("DB_SSLMODE") {
            config.ssl_mode = ssl_mode;
        }
        config.root_cert = lookup("DB_ROOT_CERT").map(PathBuf::from);
        if let Some(max) = lookup("DB_MAX_CONNECTIONS") {
            config.max_connections = MaxConnections::new(parse("DB_MAX_CONNECTIONS", &max)?);
        }
        if let Some(debug) = lookup("DB_DEBUG") {
            config.debug = parse_bool("DB_DEBUG", &debug)?;
        }
        Ok(config)
    }

    /// Read credentials from mounted secret files in `dir`.
    ///
    /// `db.host`, `db.port`, `db.name`, `db.user` and `db.password` are
    /// required; `db.rootcert` is used as the TLS root certificate when
    /// present.
    pub fn from_secret_files(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let dir = dir.as_ref();
        let root_cert = dir.join("db.rootcert");
        Ok(Self {
            host: read_secret(dir, "db.host")?,
            port: parse("db.port", &read_secret(dir, "db.port")?)?,
            name: read_secret(dir, "db.name")?,
            username: read_secret(dir, "db.user")?,
            password: Some(read_secret(dir, "db.password")?),
            root_cert: root_cert.is_file().then_some(root_cert),
            ..Self::default()
        })
    }

    /// sqlx connect options for this configuration.
    pub fn connect_options(&self) -> Result<PgConnectOptions, ConfigError> {
        let options = match &self.url {
            Some(url) => PgConnectOptions::from_str(url).map_err(ConfigError::InvalidUrl)?,
            None => {
                let ssl_mode =
                    PgSslMode::from_str(&self.ssl_mode).map_err(|_| ConfigError::InvalidValue {
                        key: "DB_SSLMODE",
                        value: self.ssl_mode.clone(),
                    })?;
                let mut options = PgConnectOptions::new_without_pgpass()
                    .host(&self.host)
                    .port(self.port)
                    .database(&self.name)
                    .username(&self.username)
                    .ssl_mode(ssl_mode);
                if let Some(password) = &self.password {
                    options = options.password(password);
                }
                if let Some(root_cert) = &self.root_cert {
                    options = options.ssl_root_cert(root_cert);
                }
                options
            }
        };
        Ok(if self.debug {
            options
        } else {
            options.disable_statement_logging()
        })
    }

    /// Connection description with the password redacted, for logs.
    pub fn log_safe_connection_string(&self) -> String {
        match &self.url {
            Some(url) => match PgConnectOptions::from_str(url) {
                Ok(options) => format!(
                    "host={} port={} dbname={} user={} password='<REDACTED>'",
                    options.get_host(),
                    options.get_port(),
                    options.get_database().unwrap_or_default(),
                    options.get_username(),
                ),
                Err(_) => "<unparsable DATABASE_URL>".to_string(),
            },
            None => format!(
                "host={} port={} dbname={} user={} password='<REDACTED>' sslmode={}",
                self.host, self.port, self.name, self.username, self.ssl_mode
            ),
        }
    }
}
