//! Composition of listener, dispatcher and resync loop.

use std::sync::Arc;

use reconcile_types::{Channel, EventStore, ListenerError, LockFactory, NotificationListener};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::manager::ControllerManager;
use crate::registry::ControllerConfig;
use crate::resync::ResyncConfig;

/// Configuration for a `ControllerServer`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Channel to listen on (default: `events`)
    pub channel: Channel,
    /// Resync loop settings; `None` disables the loop
    pub resync: Option<ResyncConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            channel: Channel::events(),
            resync: Some(ResyncConfig::default()),
        }
    }
}

/// One controller server: a listener feeding a dispatcher, plus the resync
/// loop.
///
/// Deliveries are dispatched inline on the listener task, so a server has at
/// most one dispatch in flight. Run several servers, in one process or many,
/// to share the load; with `EventLocking::FailFast` each event is still
/// handled once.
pub struct ControllerServer<S, L, N> {
    manager: Arc<ControllerManager<S, L>>,
    listener: N,
    config: ServerConfig,
}

impl<S, L, N> ControllerServer<S, L, N>
where
    S: EventStore + Send + Sync,
    L: LockFactory + Send + Sync,
    N: NotificationListener + Sync,
{
    /// Pair a manager with the listener that feeds it, using the default config.
    pub fn new(manager: ControllerManager<S, L>, listener: N) -> Self {
        Self {
            manager: Arc::new(manager),
            listener,
            config: ServerConfig::default(),
        }
    }

    /// Replace the server configuration.
    #[must_use]
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// The dispatcher this server feeds.
    pub const fn manager(&self) -> &Arc<ControllerManager<S, L>> {
        &self.manager
    }

    /// Register a controller with this server's dispatcher.
    pub fn add(&self, config: ControllerConfig) {
        self.manager.add(config);
    }

    /// Listen and dispatch until `shutdown` is cancelled.
    ///
    /// Returns the listener's error if it gives up; the resync loop is
    /// stopped either way.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), ListenerError> {
        let stop_resync = shutdown.child_token();
        info!(
            channel = %self.config.channel,
            resync = self.config.resync.is_some(),
            "[server.start] controller server starting"
        );

        let listen = async {
            let manager = Arc::clone(&self.manager);
            let outcome = self
                .listener
                .listen(&self.config.channel, shutdown.clone(), move |payload| {
                    let manager = Arc::clone(&manager);
                    async move {
                        let _ = manager.handle(&payload).await;
                    }
                })
                .await;
            stop_resync.cancel();
            outcome
        };

        let resync = async {
            if let Some(config) = self.config.resync {
                self.manager.run_resync(config, &stop_resync).await;
            }
        };

        let (outcome, ()) = tokio::join!(listen, resync);
        match &outcome {
            Ok(()) => info!("[server.stop] controller server stopped"),
            Err(error) => warn!(error = %error, "[server.listener_failed] listener gave up"),
        }
        outcome
    }
}
