//! PostgreSQL backend for the `reconcile` controller framework.
//!
//! - [`PostgresEventStore`] stores events in the `events` table and publishes
//!   each new id with `pg_notify`.
//! - [`PostgresLockFactory`] hands out transaction-scoped two-key advisory
//!   locks (`pg_advisory_xact_lock` / `pg_try_advisory_xact_lock`).
//! - [`PostgresListener`] subscribes with `LISTEN` on a dedicated
//!   connection, pings it when idle and reconnects with backoff.
//!
//! All three share one `sqlx` pool built by [`connect_pool`].

mod config;
mod event_store;
mod listener;
mod lock;
/// Lock metrics.
pub mod monitoring;
/// Backoff for connect and listen steps.
pub mod retry;

use std::time::Duration;

use nutype::nutype;
use reconcile_types::LockError;
use sqlx::{postgres::PgPoolOptions, Pool, Postgres};
use thiserror::Error;
use tracing::info;

pub use config::{ConfigError, DatabaseConfig};
pub use event_store::PostgresEventStore;
pub use listener::{ListenerConfig, PostgresListener};
pub use lock::PostgresLockFactory;
pub use monitoring::{CategoryLockMetrics, LockMetrics, LockMetricsSnapshot};
pub use retry::{RetryError, RetryStrategy};

/// Errors raised while setting up or maintaining the Postgres backend.
///
/// Per-call failures of the event store, locks and listener are reported
/// through their trait error types instead.
#[derive(Debug, Error)]
pub enum PostgresError {
    /// The pool could not be created, even after retries.
    #[error("failed to create postgres connection pool")]
    PoolCreation(#[source] sqlx::Error),

    /// A database round-trip failed.
    #[error("database operation failed")]
    Connection(#[from] sqlx::Error),

    /// Applying the schema migrations failed.
    #[error("schema migration failed")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// The migrations lock could not be taken.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// The connection settings are invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Maximum number of database connections in the pool.
///
/// MaxConnections represents the connection pool size limit. It must be at least 1,
/// enforced by using NonZeroU32 as the underlying type.
///
/// Every held lock and every listener pins one connection, so size the pool
/// for the expected number of concurrent locks plus one per listener.
#[nutype(derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRef, Into))]
pub struct MaxConnections(std::num::NonZeroU32);

/// Configuration for the shared connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Maximum number of connections in the pool (default: 10)
    pub max_connections: MaxConnections,
    /// Timeout for acquiring a connection from the pool (default: 30 seconds)
    pub acquire_timeout: Duration,
    /// Idle timeout for connections in the pool (default: 10 minutes)
    pub idle_timeout: Duration,
    /// Retry policy for establishing the pool
    pub connect_retry: RetryStrategy,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        const DEFAULT_MAX_CONNECTIONS: std::num::NonZeroU32 = match std::num::NonZeroU32::new(10) {
            Some(v) => v,
            None => unreachable!(),
        };

        Self {
            max_connections: MaxConnections::new(DEFAULT_MAX_CONNECTIONS),
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600), // 10 minutes
            connect_retry: RetryStrategy::default(),
        }
    }
}

impl PostgresConfig {
    fn pool_options(&self) -> PgPoolOptions {
        let max_connections: std::num::NonZeroU32 = self.max_connections.into();
        PgPoolOptions::new()
            .max_connections(max_connections.get())
            .acquire_timeout(self.acquire_timeout)
            .idle_timeout(self.idle_timeout)
    }
}

/// Connect a pool to `connection_string`, retrying transient failures.
pub async fn connect_pool(
    connection_string: &str,
    config: &PostgresConfig,
) -> Result<Pool<Postgres>, PostgresError> {
    let pool = retry::retry_operation(&config.connect_retry, "connect_pool", || async move {
        config
            .pool_options()
            .connect(connection_string)
            .await
            .map_err(PostgresError::PoolCreation)
    })
    .await?;
    info!(
        max_connections = %config.max_connections,
        "[postgres.connect] connection pool ready"
    );
    Ok(pool)
}

/// Connect a pool from a [`DatabaseConfig`], retrying transient failures.
pub async fn connect_with_config(database: &DatabaseConfig) -> Result<Pool<Postgres>, PostgresError> {
    let options = database.connect_options()?;
    let config = PostgresConfig {
        max_connections: database.max_connections,
        ..PostgresConfig::default()
    };
    info!(
        database = %database.log_safe_connection_string(),
        "[postgres.connect] connecting"
    );
    let options = &options;
    let config = &config;
    let pool = retry::retry_operation(&config.connect_retry, "connect_pool", || async move {
        config
            .pool_options()
            .connect_with(options.clone())
            .await
            .map_err(PostgresError::PoolCreation)
    })
    .await?;
    Ok(pool)
}
