//! Helpers shared by the cross-crate scenarios in `tests/`.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use reconcile::{
    ControllerConfig, ControllerManager, ControllerServer, Event, EventId, EventLocking, EventStore,
    EventType, ListenerError, NewEvent, ServerConfig, Source, SourceId,
};
use reconcile_memory::{InMemoryEventStore, InMemoryListener, InMemoryLockFactory};
use reconcile_testing::HandlerRecorder;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A controller server on the in-memory backend whose manager reads through `S`.
pub type MemoryServer<S> = ControllerServer<S, InMemoryLockFactory, InMemoryListener>;

/// The source every scenario's events and controllers use.
pub fn dinosaurs() -> Source {
    match Source::try_new("Dinosaurs") {
        Ok(source) => source,
        Err(_) => unreachable!(),
    }
}

/// A fleet of controller servers over one in-memory store and lock table.
pub struct Fleet<S> {
    /// Store shared by every server
    pub store: InMemoryEventStore,
    /// Lock table shared by every server
    pub locks: InMemoryLockFactory,
    /// The running servers
    pub servers: Vec<Arc<MemoryServer<S>>>,
    shutdown: CancellationToken,
    running: Vec<JoinHandle<Result<(), ListenerError>>>,
}

/// How the fleet's servers are built.
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Number of servers (default: 3)
    pub servers: usize,
    /// Event locking for every manager (default: `FailFast`)
    pub locking: EventLocking,
    /// Server settings (default: no resync)
    pub server: ServerConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            servers: 3,
            locking: EventLocking::FailFast,
            server: ServerConfig {
                resync: None,
                ..ServerConfig::default()
            },
        }
    }
}

impl<S> Fleet<S>
where
    S: EventStore + Send + Sync + 'static,
{
    /// Start `config.servers` servers whose managers load events through
    /// `wrap(store)` and route Dinosaurs `Create` events to `recorder`.
    pub async fn start<W>(config: FleetConfig, recorder: &HandlerRecorder, wrap: W) -> Self
    where
        W: Fn(InMemoryEventStore) -> S,
    {
        let store = InMemoryEventStore::new();
        let locks = InMemoryLockFactory::new();
        let shutdown = CancellationToken::new();

        let servers: Vec<Arc<MemoryServer<S>>> = (0..config.servers)
            .map(|_| {
                let manager = ControllerManager::new(wrap(store.clone()), locks.clone())
                    .with_event_locking(config.locking);
                let server = ControllerServer::new(manager, store.listener())
                    .with_config(config.server.clone());
                server.add(
                    ControllerConfig::new(dinosaurs()).on(EventType::Create, recorder.handler()),
                );
                Arc::new(server)
            })
            .collect();

        let running = servers
            .iter()
            .map(|server| {
                let server = Arc::clone(server);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { server.run(shutdown).await })
            })
            .collect();

        let fleet = Self {
            store,
            locks,
            servers,
            shutdown,
            running,
        };
        fleet.await_subscribed().await;
        fleet
    }

    async fn await_subscribed(&self) {
        let expected = self.servers.len();
        while self.store.subscriber_count() < expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        debug!(servers = expected, "[fleet.ready] every server is listening");
    }

    /// Create `count` Dinosaurs `Create` events, returning their ids in order.
    pub async fn create_events(&self, count: usize) -> Vec<EventId> {
        let mut ids = Vec::with_capacity(count);
        for index in 0..count {
            let source_id = match SourceId::try_new(format!("dino-{index}")) {
                Ok(source_id) => source_id,
                Err(_) => unreachable!(),
            };
            if let Ok(event) = self
                .store
                .create(NewEvent::new(dinosaurs(), source_id, EventType::Create))
                .await
            {
                ids.push(event.id);
            }
        }
        ids
    }

    /// Wait until every event in `ids` is reconciled, or `timeout` passes.
    pub async fn reconciled_within(&self, ids: &[EventId], timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                if let Ok(events) = self.store.find_by_ids(ids).await {
                    if events.len() == ids.len() && events.iter().all(Event::is_reconciled) {
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }

    /// Cancel every server and collect how each stopped.
    pub async fn shutdown(self) -> Vec<Result<(), ListenerError>> {
        self.shutdown.cancel();
        join_all(self.running)
            .await
            .into_iter()
            .map(|joined| joined.unwrap_or(Err(ListenerError::Closed)))
            .collect()
    }
}
