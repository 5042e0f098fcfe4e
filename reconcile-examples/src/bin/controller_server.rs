//! Controller server for the Dinosaurs service
//!
//! Reads the database settings from `DATABASE_URL` or the `DB_*` variables
//! (or from secret files when `DB_SECRETS_DIR` is set), applies migrations
//! and dispatches events until Ctrl-C.

use std::sync::Arc;

use anyhow::Result;
use reconcile::{ControllerManager, ControllerServer};
use reconcile_examples::DinosaurService;
use reconcile_postgres::{
    connect_with_config, DatabaseConfig, PostgresEventStore, PostgresListener, PostgresLockFactory,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,reconcile=debug,sqlx=warn";

fn database_config() -> Result<DatabaseConfig> {
    let config = match std::env::var("DB_SECRETS_DIR") {
        Ok(dir) => DatabaseConfig::from_secret_files(dir)?,
        Err(_) => DatabaseConfig::from_env()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .init();

    let database = database_config()?;
    info!(
        database = %database.log_safe_connection_string(),
        "[controller_server.start] starting controller server"
    );

    let pool = connect_with_config(&database).await?;
    let store = PostgresEventStore::from_pool(pool.clone());
    store.migrate().await?;
    let locks = PostgresLockFactory::new(pool.clone());

    let dinosaurs = Arc::new(DinosaurService::new(store.clone(), locks.clone()));
    let manager = ControllerManager::new(store, locks.clone());
    dinosaurs.register(&manager);

    let server = ControllerServer::new(manager, PostgresListener::new(pool));
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("[controller_server.shutdown] shutting down");
                    shutdown.cancel();
                }
                Err(error) => {
                    error!(error = %error, "[controller_server.signal] unable to listen for Ctrl-C");
                }
            }
        });
    }

    server.run(shutdown).await?;

    let metrics = locks.metrics();
    info!(
        metrics = ?metrics,
        "[controller_server.stop] controller server stopped"
    );
    Ok(())
}
