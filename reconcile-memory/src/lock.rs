use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use reconcile_types::{
    LockAttempt, LockCategory, LockError, LockFactory, LockKey, OwnerToken, ResourceId,
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, instrument};

/// In-process lock factory with the same keying as the Postgres one.
///
/// Locks are keyed by the hashed `LockKey`, so two resources whose hashes
/// collide contend exactly as they would on a real database. Clones share
/// their lock table.
#[derive(Clone, Default)]
pub struct InMemoryLockFactory {
    inner: Arc<LockTable>,
}

/// One registered attempt. `guard` is `None` for a non-blocking attempt that
/// did not get the lock.
struct LiveLock {
    key: LockKey,
    guard: Option<OwnedMutexGuard<()>>,
}

// A key's mutex stays in `keys` only while a holder, waiter or attempt shares
// it; clones are only taken under the `keys` lock.
#[derive(Default)]
struct LockTable {
    keys: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
    live: Mutex<HashMap<OwnerToken, LiveLock>>,
}

impl InMemoryLockFactory {
    /// Create a factory with an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of locks currently held.
    pub fn held_count(&self) -> usize {
        self.inner
            .live
            .lock()
            .values()
            .filter(|held| held.guard.is_some())
            .count()
    }

    /// Number of attempts not yet released, held or not.
    pub fn live_count(&self) -> usize {
        self.inner.live.lock().len()
    }

    /// Number of lock keys with a holder or waiter.
    pub fn key_count(&self) -> usize {
        self.inner.keys.lock().len()
    }

    fn key_mutex(&self, key: LockKey) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.inner.keys.lock().entry(key).or_default())
    }

    fn forget_unused(&self, key: LockKey) {
        let mut keys = self.inner.keys.lock();
        if keys.get(&key).is_some_and(|mutex| Arc::strong_count(mutex) == 1) {
            let _ = keys.remove(&key);
        }
    }
}

impl LockFactory for InMemoryLockFactory {
    #[instrument(name = "memory.acquire_blocking", skip(self))]
    async fn acquire_blocking(
        &self,
        resource: &ResourceId,
        category: LockCategory,
    ) -> Result<OwnerToken, LockError> {
        let owner = OwnerToken::generate();
        let key = LockKey::new(resource, category);
        let mutex = self.key_mutex(key);
        let waiting = KeyInterest { locks: self, key };
        let guard = mutex.lock_owned().await;
        drop(waiting);
        let _ = self.inner.live.lock().insert(
            owner,
            LiveLock {
                key,
                guard: Some(guard),
            },
        );
        debug!(owner = %owner, "[memory.lock] lock acquired");
        Ok(owner)
    }

    #[instrument(name = "memory.acquire_non_blocking", skip(self))]
    async fn acquire_non_blocking(
        &self,
        resource: &ResourceId,
        category: LockCategory,
    ) -> Result<LockAttempt, LockError> {
        let owner = OwnerToken::generate();
        let key = LockKey::new(resource, category);
        let guard = self.key_mutex(key).try_lock_owned().ok();
        let acquired = guard.is_some();
        let _ = self.inner.live.lock().insert(owner, LiveLock { key, guard });
        debug!(owner = %owner, acquired, "[memory.try_lock] lock attempt finished");
        Ok(LockAttempt { owner, acquired })
    }

    #[instrument(name = "memory.release", skip(self))]
    async fn release(&self, owner: &OwnerToken) {
        let released = self.inner.live.lock().remove(owner);
        match released {
            Some(LiveLock { key, guard }) => {
                drop(guard);
                self.forget_unused(key);
                debug!("[memory.unlock] lock released");
            }
            None => debug!("[memory.unlock] caller is not the lock owner"),
        }
    }
}

/// Drops a blocking waiter's key mutex when the wait is abandoned.
struct KeyInterest<'a> {
    locks: &'a InMemoryLockFactory,
    key: LockKey,
}

impl Drop for KeyInterest<'_> {
    fn drop(&mut self) {
        self.locks.forget_unused(self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn resource(raw: &str) -> ResourceId {
        ResourceId::new(raw.to_string())
    }

    #[tokio::test]
    async fn non_blocking_attempt_on_held_key_reports_not_acquired() {
        // Given: a held lock
        let locks = InMemoryLockFactory::new();
        let holder = locks
            .acquire_blocking(&resource("rex"), LockCategory::Dinosaurs)
            .await
            .expect("acquire");

        // When: another attempt targets the same key
        let attempt = locks
            .acquire_non_blocking(&resource("rex"), LockCategory::Dinosaurs)
            .await
            .expect("attempt");

        // Then: it fails fast but is still tracked until released
        assert!(!attempt.acquired);
        assert_eq!(locks.live_count(), 2);
        assert_eq!(locks.held_count(), 1);

        locks.release(&attempt.owner).await;
        locks.release(&holder).await;
        assert_eq!(locks.live_count(), 0);
    }

    #[tokio::test]
    async fn categories_are_independent() {
        let locks = InMemoryLockFactory::new();
        let _events = locks
            .acquire_blocking(&resource("rex"), LockCategory::Events)
            .await
            .expect("acquire");

        let attempt = locks
            .acquire_non_blocking(&resource("rex"), LockCategory::Dinosaurs)
            .await
            .expect("attempt");

        assert!(attempt.acquired);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_blocking_wait_leaves_no_entry() {
        // Given: a held lock
        let locks = InMemoryLockFactory::new();
        let holder = locks
            .acquire_blocking(&resource("rex"), LockCategory::Dinosaurs)
            .await
            .expect("acquire");

        // When: a second waiter gives up after a timeout
        let waited = tokio::time::timeout(
            Duration::from_secs(1),
            locks.acquire_blocking(&resource("rex"), LockCategory::Dinosaurs),
        )
        .await;

        // Then: nothing was registered for the abandoned wait
        assert!(waited.is_err());
        assert_eq!(locks.live_count(), 1);
        locks.release(&holder).await;
        assert_eq!(locks.held_count(), 0);
        assert_eq!(locks.key_count(), 0);
    }

    #[tokio::test]
    async fn released_keys_leave_the_table() {
        // Given: many short-lived locks on distinct resources
        let locks = InMemoryLockFactory::new();
        for index in 0..1000 {
            let resource = resource(&format!("event-{index}"));
            let owner = locks
                .acquire_blocking(&resource, LockCategory::Events)
                .await
                .expect("acquire");
            let attempt = locks
                .acquire_non_blocking(&resource, LockCategory::Events)
                .await
                .expect("attempt");
            assert!(!attempt.acquired);

            // When: every attempt is released
            locks.release(&attempt.owner).await;
            assert_eq!(locks.key_count(), 1, "the holder keeps its key");
            locks.release(&owner).await;
        }

        // Then: no key outlives its last holder
        assert_eq!(locks.live_count(), 0);
        assert_eq!(locks.key_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn waiting_acquirer_keeps_the_key_until_it_releases() {
        // Given: a held lock and a blocked waiter
        let locks = InMemoryLockFactory::new();
        let holder = locks
            .acquire_blocking(&resource("rex"), LockCategory::Dinosaurs)
            .await
            .expect("acquire");
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                locks
                    .acquire_blocking(&resource("rex"), LockCategory::Dinosaurs)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // When: the holder releases
        locks.release(&holder).await;
        let next = waiter.await.expect("join").expect("acquire");

        // Then: the waiter holds the same key, which goes away on its release
        assert_eq!(locks.held_count(), 1);
        assert_eq!(locks.key_count(), 1);
        locks.release(&next).await;
        assert_eq!(locks.key_count(), 0);
    }
}
