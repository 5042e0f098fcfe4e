use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use reconcile_types::{
    run_listener, Channel, IdleInterval, ListenerError, Notification, NotificationConnection,
    NotificationListener,
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Listener fed by an `InMemoryEventStore`'s broadcast channel.
///
/// Every call to `listen` subscribes afresh, so notifications published
/// before the subscription are not seen, matching `LISTEN` semantics.
#[derive(Clone)]
pub struct InMemoryListener {
    notifications: broadcast::Sender<Notification>,
    idle_interval: IdleInterval,
    pings: Arc<AtomicUsize>,
}

impl InMemoryListener {
    pub(crate) fn new(
        notifications: broadcast::Sender<Notification>,
        idle_interval: IdleInterval,
    ) -> Self {
        Self {
            notifications,
            idle_interval,
            pings: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Ping after `idle_interval` without a notification.
    #[must_use]
    pub fn with_idle_interval(mut self, idle_interval: IdleInterval) -> Self {
        self.idle_interval = idle_interval;
        self
    }

    /// Liveness pings issued so far by this listener and its clones.
    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }
}

struct BroadcastConnection {
    channel: Channel,
    receiver: broadcast::Receiver<Notification>,
    pings: Arc<AtomicUsize>,
}

impl NotificationConnection for BroadcastConnection {
    async fn recv(&mut self) -> Result<Notification, ListenerError> {
        loop {
            match self.receiver.recv().await {
                Ok(notification) if notification.channel == self.channel => {
                    return Ok(notification)
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "[memory.listener_lagged] notifications dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return Err(ListenerError::Closed),
            }
        }
    }

    async fn ping(&mut self) -> Result<(), ListenerError> {
        let _ = self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl NotificationListener for InMemoryListener {
    async fn listen<F, Fut>(
        &self,
        channel: &Channel,
        shutdown: CancellationToken,
        mut on_id: F,
    ) -> Result<(), ListenerError>
    where
        F: FnMut(String) -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        let mut connection = BroadcastConnection {
            channel: channel.clone(),
            receiver: self.notifications.subscribe(),
            pings: Arc::clone(&self.pings),
        };
        run_listener(&mut connection, self.idle_interval, &shutdown, &mut on_id).await
    }
}
