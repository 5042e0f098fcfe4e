use std::future::Future;

use reconcile_types::{
    run_listener, Channel, IdleInterval, ListenerError, Notification, NotificationConnection,
    NotificationListener,
};
use sqlx::postgres::PgListener;
use sqlx::{query, Pool, Postgres};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::retry::RetryStrategy;

/// Settings for [`PostgresListener`].
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Ping the connection after this long without a notification (default: 10 seconds)
    pub idle_interval: IdleInterval,
    /// Backoff between reconnects; `max_attempts` consecutive failures end `listen`
    pub reconnect: RetryStrategy,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            idle_interval: IdleInterval::default(),
            reconnect: RetryStrategy::conservative(),
        }
    }
}

/// `LISTEN`-based subscriber.
///
/// Each `listen` call takes its own connection out of the pool and keeps it
/// for as long as it listens. A lost connection is replaced with backoff; notifications sent
/// while no connection is subscribed are not replayed, which the controller
/// server's resync loop covers.
#[derive(Debug, Clone)]
pub struct PostgresListener {
    pool: Pool<Postgres>,
    config: ListenerConfig,
}

impl PostgresListener {
    /// A listener on `pool` with the default config.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self::with_config(pool, ListenerConfig::default())
    }

    /// A listener on `pool` with `config`.
    pub const fn with_config(pool: Pool<Postgres>, config: ListenerConfig) -> Self {
        Self { pool, config }
    }

    /// The listener's settings.
    pub const fn config(&self) -> &ListenerConfig {
        &self.config
    }

    async fn subscribe(&self, channel: &Channel) -> Result<PgChannelConnection, ListenerError> {
        let mut listener = PgListener::connect_with(&self.pool).await.map_err(|error| {
            error!(
                error = %error,
                channel = %channel,
                "[postgres.listen_connect_failed] could not open listener connection"
            );
            ListenerError::ConnectFailed {
                channel: channel.clone(),
            }
        })?;
        listener.listen(channel.as_ref()).await.map_err(|error| {
            error!(
                error = %error,
                channel = %channel,
                "[postgres.listen_failed] LISTEN was rejected"
            );
            ListenerError::SubscribeFailed {
                channel: channel.clone(),
            }
        })?;
        info!(channel = %channel, "[postgres.listen] subscribed");
        Ok(PgChannelConnection { listener })
    }
}

impl NotificationListener for PostgresListener {
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
        let max_attempts = self.config.reconnect.max_attempts.max(1);
        let mut failures: u32 = 0;

        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }

            let outcome = match self.subscribe(channel).await {
                Ok(mut connection) => {
                    failures = 0;
                    run_listener(
                        &mut connection,
                        self.config.idle_interval,
                        &shutdown,
                        &mut on_id,
                    )
                    .await
                }
                Err(error) => Err(error),
            };
            let error = match outcome {
                Ok(()) => return Ok(()),
                Err(error) => error,
            };

            failures += 1;
            if failures >= max_attempts {
                error!(
                    error = %error,
                    channel = %channel,
                    failures,
                    "[postgres.listen_gave_up] listener could not be kept alive"
                );
                return Err(error);
            }

            let delay = self.config.reconnect.calculate_delay(failures);
            warn!(
                error = %error,
                channel = %channel,
                failures,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "[postgres.listen_reconnect] listener connection lost, reconnecting"
            );
            tokio::select! {
                () = shutdown.cancelled() => return Ok(()),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// One subscribed `PgListener`.
struct PgChannelConnection {
    listener: PgListener,
}

impl NotificationConnection for PgChannelConnection {
    async fn recv(&mut self) -> Result<Notification, ListenerError> {
        // `try_recv` reports a dropped connection as `None` instead of
        // silently reconnecting, so the gap is logged and backed off.
        let received = self.listener.try_recv().await.map_err(|error| {
            warn!(error = %error, "[postgres.listen_receive_failed] notification receive failed");
            ListenerError::ReceiveFailed
        })?;
        let notification = received.ok_or(ListenerError::Closed)?;
        let channel = Channel::try_new(notification.channel().to_string())
            .map_err(|_| ListenerError::ReceiveFailed)?;
        Ok(Notification {
            channel,
            payload: notification.payload().to_string(),
        })
    }

    async fn ping(&mut self) -> Result<(), ListenerError> {
        let _ = query("SELECT 1")
            .execute(&mut self.listener)
            .await
            .map_err(|error| {
                warn!(error = %error, "[postgres.ping_failed] listener ping failed");
                ListenerError::PingFailed
            })?;
        Ok(())
    }
}
