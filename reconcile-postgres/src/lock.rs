use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use reconcile_types::{
    LockAttempt, LockCategory, LockError, LockFactory, LockKey, OwnerToken, ResourceId,
};
use sqlx::{query, query_scalar, Pool, Postgres, Transaction};
use tracing::{debug, error, instrument};

use crate::monitoring::{LockMetrics, LockMetricsSnapshot};

/// A live acquisition attempt: the open transaction that holds (or, for a
/// failed non-blocking attempt, merely waits to be ended) the advisory lock.
struct HeldLock {
    transaction: Transaction<'static, Postgres>,
    resource: ResourceId,
    category: LockCategory,
    acquired: bool,
    started: Instant,
}

/// Advisory-lock factory backed by transaction-scoped Postgres locks.
///
/// Each attempt begins its own transaction on a pooled connection and runs
/// `pg_advisory_xact_lock` or `pg_try_advisory_xact_lock` inside it. The lock
/// is released when that transaction commits in [`release`](LockFactory::release).
/// If the process dies the connection drops, the transaction ends and
/// Postgres frees the lock.
///
/// Every live attempt pins one pool connection until released.
#[derive(Clone)]
pub struct PostgresLockFactory {
    pool: Pool<Postgres>,
    live: Arc<Mutex<HashMap<OwnerToken, HeldLock>>>,
    metrics: Arc<LockMetrics>,
}

impl PostgresLockFactory {
    /// A factory whose locks each pin one connection from `pool`.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            live: Arc::new(Mutex::new(HashMap::new())),
            metrics: Arc::new(LockMetrics::new()),
        }
    }

    /// Number of attempts not yet released, held or not.
    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    /// Current lock counters, per category.
    pub fn metrics(&self) -> LockMetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn begin(
        &self,
        resource: &ResourceId,
        category: LockCategory,
    ) -> Result<Transaction<'static, Postgres>, LockError> {
        self.pool.begin().await.map_err(|error| {
            error!(
                error = %error,
                resource = %resource,
                category = %category,
                "[postgres.lock_begin_failed] could not begin lock transaction"
            );
            self.metrics.record_lock_error(category);
            LockError::BeginFailed {
                resource: resource.clone(),
                category,
            }
        })
    }

    fn acquire_failed(
        &self,
        error: &sqlx::Error,
        owner: OwnerToken,
        resource: &ResourceId,
        category: LockCategory,
    ) -> LockError {
        error!(
            error = %error,
            owner = %owner,
            resource = %resource,
            category = %category,
            "[postgres.lock_failed] advisory lock statement failed"
        );
        self.metrics.record_lock_error(category);
        LockError::AcquireFailed {
            owner,
            resource: resource.clone(),
            category,
        }
    }

    fn register(
        &self,
        owner: OwnerToken,
        transaction: Transaction<'static, Postgres>,
        resource: &ResourceId,
        category: LockCategory,
        acquired: bool,
    ) {
        let held = HeldLock {
            transaction,
            resource: resource.clone(),
            category,
            acquired,
            started: Instant::now(),
        };
        let _ = self.live.lock().insert(owner, held);
    }
}

impl LockFactory for PostgresLockFactory {
    #[instrument(name = "postgres.acquire_blocking", skip(self))]
    async fn acquire_blocking(
        &self,
        resource: &ResourceId,
        category: LockCategory,
    ) -> Result<OwnerToken, LockError> {
        let owner = OwnerToken::generate();
        let key = LockKey::new(resource, category);
        let mut transaction = self.begin(resource, category).await?;

        // On failure the transaction is dropped here, which rolls it back.
        query("SELECT pg_advisory_xact_lock($1, $2)")
            .bind(key.resource())
            .bind(key.category())
            .execute(&mut *transaction)
            .await
            .map_err(|error| self.acquire_failed(&error, owner, resource, category))?;

        self.register(owner, transaction, resource, category, true);
        self.metrics.record_acquired(category);
        debug!(owner = %owner, "[postgres.lock] advisory lock acquired");
        Ok(owner)
    }

    #[instrument(name = "postgres.acquire_non_blocking", skip(self))]
    async fn acquire_non_blocking(
        &self,
        resource: &ResourceId,
        category: LockCategory,
    ) -> Result<LockAttempt, LockError> {
        let owner = OwnerToken::generate();
        let key = LockKey::new(resource, category);
        let mut transaction = self.begin(resource, category).await?;

        let acquired: bool = query_scalar("SELECT pg_try_advisory_xact_lock($1, $2)")
            .bind(key.resource())
            .bind(key.category())
            .fetch_one(&mut *transaction)
            .await
            .map_err(|error| self.acquire_failed(&error, owner, resource, category))?;

        self.register(owner, transaction, resource, category, acquired);
        if acquired {
            self.metrics.record_acquired(category);
        } else {
            self.metrics.record_contended(category);
        }
        debug!(owner = %owner, acquired, "[postgres.try_lock] advisory lock attempt finished");
        Ok(LockAttempt { owner, acquired })
    }

    #[instrument(name = "postgres.release", skip(self))]
    async fn release(&self, owner: &OwnerToken) {
        let held = self.live.lock().remove(owner);
        let Some(held) = held else {
            debug!("[postgres.unlock] caller is not the lock owner");
            return;
        };

        let HeldLock {
            transaction,
            resource,
            category,
            acquired,
            started,
        } = held;
        match transaction.commit().await {
            Ok(()) => {
                if acquired {
                    self.metrics.record_released(category, started.elapsed());
                }
                debug!(
                    resource = %resource,
                    category = %category,
                    "[postgres.unlock] lock transaction committed"
                );
            }
            Err(error) => {
                self.metrics.record_unlock_error(category);
                error!(
                    error = %error,
                    resource = %resource,
                    category = %category,
                    "[postgres.unlock_failed] could not commit lock transaction"
                );
            }
        }
    }
}
