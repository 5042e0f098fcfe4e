use std::future::Future;
use std::time::Duration;

use nutype::nutype;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Name of the channel event stores publish new event ids on.
pub const EVENTS_CHANNEL: &str = "events";

/// A notification channel name.
///
/// Channel names are Postgres identifiers, so they are limited to 63 bytes.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 63),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct Channel(String);

impl Channel {
    /// The channel carrying new event ids.
    pub fn events() -> Self {
        match Self::try_new(EVENTS_CHANNEL.to_string()) {
            Ok(channel) => channel,
            Err(_) => unreachable!(),
        }
    }
}

/// How long a listener waits for a notification before pinging its connection.
#[nutype(
    validate(predicate = |interval| !interval.is_zero()),
    default = Duration::from_secs(10),
    derive(Debug, Clone, Copy, PartialEq, Eq, AsRef, Into, Default)
)]
pub struct IdleInterval(Duration);

/// A delivered notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Channel the notification arrived on
    pub channel: Channel,
    /// Raw payload, an event id on the events channel
    pub payload: String,
}

/// Why a listener stopped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListenerError {
    /// No connection could be opened for the listener.
    #[error("failed to open listener connection for channel {channel}")]
    ConnectFailed { channel: Channel },

    /// `LISTEN` on the channel failed.
    #[error("failed to subscribe to channel {channel}")]
    SubscribeFailed { channel: Channel },

    /// The connection failed while waiting for a notification.
    #[error("failed to receive notification")]
    ReceiveFailed,

    /// The idle ping did not round-trip.
    #[error("liveness ping failed")]
    PingFailed,

    /// The notification source went away.
    #[error("notification source closed")]
    Closed,
}

/// A subscribed connection that yields notifications.
pub trait NotificationConnection: Send {
    /// Wait for the next notification.
    fn recv(&mut self) -> impl Future<Output = Result<Notification, ListenerError>> + Send;

    /// Round-trip the connection to prove it is still alive.
    fn ping(&mut self) -> impl Future<Output = Result<(), ListenerError>> + Send;
}

/// Long-lived subscriber to a notification channel.
pub trait NotificationListener {
    /// Subscribe to `channel` and call `on_id` with every delivered payload
    /// until `shutdown` is cancelled.
    ///
    /// `on_id` runs on the listener's own task: the next notification is not
    /// read until it completes. Cancellation is observed between
    /// notifications, so an in-flight `on_id` always finishes.
    fn listen<F, Fut>(
        &self,
        channel: &Channel,
        shutdown: CancellationToken,
        on_id: F,
    ) -> impl Future<Output = Result<(), ListenerError>> + Send
    where
        F: FnMut(String) -> Fut + Send,
        Fut: Future<Output = ()> + Send;
}

/// Drive one subscribed connection until `shutdown` fires or the connection fails.
///
/// When no notification arrives within `idle_interval` the connection is
/// pinged and the loop carries on without calling `on_id`. A failed receive
/// or ping ends the loop with the error so the owner can reconnect.
pub async fn run_listener<C, F, Fut>(
    connection: &mut C,
    idle_interval: IdleInterval,
    shutdown: &CancellationToken,
    on_id: &mut F,
) -> Result<(), ListenerError>
where
    C: NotificationConnection,
    F: FnMut(String) -> Fut + Send,
    Fut: Future<Output = ()> + Send,
{
    let idle: Duration = idle_interval.into();
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                debug!("[listener.shutdown] listener cancelled");
                return Ok(());
            }
            received = tokio::time::timeout(idle, connection.recv()) => match received {
                Ok(Ok(notification)) => {
                    info!(
                        channel = %notification.channel,
                        payload = %notification.payload,
                        "[listener.notification] received notification"
                    );
                    on_id(notification.payload).await;
                }
                Ok(Err(error)) => {
                    warn!(error = %error, "[listener.receive_failed] notification receive failed");
                    return Err(error);
                }
                Err(_) => {
                    trace!(
                        idle_secs = idle.as_secs(),
                        "[listener.idle] no notification received, pinging connection"
                    );
                    connection.ping().await?;
                }
            }
        }
    }
}
