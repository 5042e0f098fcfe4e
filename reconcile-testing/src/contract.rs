use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use reconcile_types::{
    BatchSize, Channel, Event, EventId, EventStore, EventStoreError, EventType, LockCategory,
    LockError, LockFactory, NewEvent, NotificationListener, ResourceId, Source, SourceId,
};
use tokio_util::sync::CancellationToken;

/// A contract that did not hold, with the scenario it failed in.
#[derive(Debug)]
pub struct ContractTestFailure {
    scenario: &'static str,
    detail: String,
}

impl ContractTestFailure {
    fn new(scenario: &'static str, detail: impl Into<String>) -> Self {
        Self {
            scenario,
            detail: detail.into(),
        }
    }

    fn store_error(
        scenario: &'static str,
        operation: &'static str,
        error: EventStoreError,
    ) -> Self {
        Self::new(
            scenario,
            format!("{operation} operation returned unexpected error: {error}"),
        )
    }

    fn lock_error(scenario: &'static str, operation: &'static str, error: LockError) -> Self {
        Self::new(
            scenario,
            format!("{operation} operation returned unexpected error: {error}"),
        )
    }

    fn assertion(scenario: &'static str, detail: impl Into<String>) -> Self {
        Self::new(scenario, detail)
    }
}

impl fmt::Display for ContractTestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.scenario, self.detail)
    }
}

impl std::error::Error for ContractTestFailure {}

/// Outcome of one contract.
pub type ContractTestResult = Result<(), ContractTestFailure>;

/// How long a contract waits for something that should happen promptly.
const PATIENCE: Duration = Duration::from_secs(10);

fn contract_resource() -> ResourceId {
    // Unique per run so suites can share one database
    ResourceId::from(&EventId::generate())
}

fn contract_event(scenario: &'static str, label: &str) -> Result<NewEvent, ContractTestFailure> {
    let source = Source::try_new("ContractTests")
        .map_err(|error| ContractTestFailure::assertion(scenario, error.to_string()))?;
    let raw = format!("{scenario}::{label}::{}", EventId::generate());
    let source_id = SourceId::try_new(raw)
        .map_err(|error| ContractTestFailure::assertion(scenario, error.to_string()))?;
    Ok(NewEvent::new(source, source_id, EventType::Create))
}

async fn create_event<S: EventStore>(
    scenario: &'static str,
    store: &S,
    label: &str,
) -> Result<Event, ContractTestFailure> {
    store
        .create(contract_event(scenario, label)?)
        .await
        .map_err(|error| ContractTestFailure::store_error(scenario, "create", error))
}

// ---------------------------------------------------------------------------
// Lock factory contracts
// ---------------------------------------------------------------------------

/// A held lock makes other non-blocking attempts on the same key fail.
pub async fn test_lock_excludes_other_owners<F, L>(make_locks: F) -> ContractTestResult
where
    F: Fn() -> L,
    L: LockFactory,
{
    const SCENARIO: &str = "lock_excludes_other_owners";

    let locks = make_locks();
    let resource = contract_resource();

    let holder = locks
        .acquire_blocking(&resource, LockCategory::Events)
        .await
        .map_err(|error| ContractTestFailure::lock_error(SCENARIO, "acquire_blocking", error))?;

    let contender = locks
        .acquire_non_blocking(&resource, LockCategory::Events)
        .await
        .map_err(|error| {
            ContractTestFailure::lock_error(SCENARIO, "acquire_non_blocking", error)
        })?;
    locks.release(&contender.owner).await;

    if contender.acquired {
        locks.release(&holder).await;
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            "second owner acquired a lock that was already held",
        ));
    }

    locks.release(&holder).await;

    let after = locks
        .acquire_non_blocking(&resource, LockCategory::Events)
        .await
        .map_err(|error| {
            ContractTestFailure::lock_error(SCENARIO, "acquire_non_blocking", error)
        })?;
    locks.release(&after.owner).await;

    if !after.acquired {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            "lock was still held after its owner released it",
        ));
    }

    Ok(())
}

/// A blocked acquirer is granted the lock once the holder releases.
pub async fn test_blocking_waiter_proceeds_after_release<F, L>(make_locks: F) -> ContractTestResult
where
    F: Fn() -> L,
    L: LockFactory + Clone + Send + Sync + 'static,
{
    const SCENARIO: &str = "blocking_waiter_proceeds_after_release";

    let locks = make_locks();
    let resource = contract_resource();

    let holder = locks
        .acquire_blocking(&resource, LockCategory::Dinosaurs)
        .await
        .map_err(|error| ContractTestFailure::lock_error(SCENARIO, "acquire_blocking", error))?;

    let waiter = {
        let locks = locks.clone();
        let resource = resource.clone();
        tokio::spawn(async move {
            let owner = locks
                .acquire_blocking(&resource, LockCategory::Dinosaurs)
                .await?;
            locks.release(&owner).await;
            Ok::<(), LockError>(())
        })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    if waiter.is_finished() {
        locks.release(&holder).await;
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            "blocking acquisition returned while the lock was held",
        ));
    }

    locks.release(&holder).await;

    match tokio::time::timeout(PATIENCE, waiter).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(error))) => Err(ContractTestFailure::lock_error(
            SCENARIO,
            "acquire_blocking",
            error,
        )),
        Ok(Err(join_error)) => Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("waiter task failed: {join_error}"),
        )),
        Err(_) => Err(ContractTestFailure::assertion(
            SCENARIO,
            "waiter never acquired the lock after release",
        )),
    }
}

/// One resource locked in two categories does not contend.
pub async fn test_categories_are_independent<F, L>(make_locks: F) -> ContractTestResult
where
    F: Fn() -> L,
    L: LockFactory,
{
    const SCENARIO: &str = "categories_are_independent";

    let locks = make_locks();
    let resource = contract_resource();

    let events = locks
        .acquire_blocking(&resource, LockCategory::Events)
        .await
        .map_err(|error| ContractTestFailure::lock_error(SCENARIO, "acquire_blocking", error))?;
    let dinosaurs = locks
        .acquire_non_blocking(&resource, LockCategory::Dinosaurs)
        .await
        .map_err(|error| {
            ContractTestFailure::lock_error(SCENARIO, "acquire_non_blocking", error)
        })?;

    locks.release(&dinosaurs.owner).await;
    locks.release(&events).await;

    if !dinosaurs.acquired {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            "same resource under another category was reported as held",
        ));
    }

    Ok(())
}

/// Releasing twice, or releasing an unknown token, is a no-op.
pub async fn test_release_is_idempotent<F, L>(make_locks: F) -> ContractTestResult
where
    F: Fn() -> L,
    L: LockFactory,
{
    const SCENARIO: &str = "release_is_idempotent";

    let locks = make_locks();
    let resource = contract_resource();

    let first = locks
        .acquire_blocking(&resource, LockCategory::Events)
        .await
        .map_err(|error| ContractTestFailure::lock_error(SCENARIO, "acquire_blocking", error))?;
    locks.release(&first).await;
    locks.release(&first).await;

    // The next owner must not lose its lock to a stale token
    let second = locks
        .acquire_blocking(&resource, LockCategory::Events)
        .await
        .map_err(|error| ContractTestFailure::lock_error(SCENARIO, "acquire_blocking", error))?;
    locks.release(&first).await;

    let contender = locks
        .acquire_non_blocking(&resource, LockCategory::Events)
        .await
        .map_err(|error| {
            ContractTestFailure::lock_error(SCENARIO, "acquire_non_blocking", error)
        })?;
    locks.release(&contender.owner).await;
    locks.release(&second).await;

    if contender.acquired {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            "releasing a stale token freed another owner's lock",
        ));
    }

    Ok(())
}

/// A not-acquired attempt is tracked until its token is released.
pub async fn test_failed_attempt_still_releases<F, L>(make_locks: F) -> ContractTestResult
where
    F: Fn() -> L,
    L: LockFactory,
{
    const SCENARIO: &str = "failed_attempt_still_releases";

    let locks = make_locks();
    let resource = contract_resource();

    let holder = locks
        .acquire_blocking(&resource, LockCategory::Migrations)
        .await
        .map_err(|error| ContractTestFailure::lock_error(SCENARIO, "acquire_blocking", error))?;
    let miss = locks
        .acquire_non_blocking(&resource, LockCategory::Migrations)
        .await
        .map_err(|error| {
            ContractTestFailure::lock_error(SCENARIO, "acquire_non_blocking", error)
        })?;

    if miss.owner == holder {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            "failed attempt reused the holder's token",
        ));
    }

    // Releasing the miss must leave the holder's lock alone
    locks.release(&miss.owner).await;
    let contender = locks
        .acquire_non_blocking(&resource, LockCategory::Migrations)
        .await
        .map_err(|error| {
            ContractTestFailure::lock_error(SCENARIO, "acquire_non_blocking", error)
        })?;
    locks.release(&contender.owner).await;
    locks.release(&holder).await;

    if contender.acquired {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            "releasing a failed attempt freed the holder's lock",
        ));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Event store contracts
// ---------------------------------------------------------------------------

/// A created event loads back unreconciled and equal.
pub async fn test_create_then_get<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S,
    S: EventStore,
{
    const SCENARIO: &str = "create_then_get";

    let store = make_store();
    let created = create_event(SCENARIO, &store, "single").await?;

    if created.is_reconciled() || created.deleted_at.is_some() {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            "new event must be live and un-reconciled",
        ));
    }

    let loaded = store
        .get(created.id)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "get", error))?;

    if loaded != created {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("loaded event {loaded:?} differs from created event {created:?}"),
        ));
    }

    Ok(())
}

/// Loading an unknown id is `NotFound`.
pub async fn test_missing_event_is_not_found<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S,
    S: EventStore,
{
    const SCENARIO: &str = "missing_event_is_not_found";

    let store = make_store();
    let id = EventId::generate();

    match store.get(id).await {
        Err(EventStoreError::NotFound { id: missing }) if missing == id => Ok(()),
        other => Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected NotFound for {id}, got {other:?}"),
        )),
    }
}

/// `replace` stamps `reconciled_at` and never clears it.
pub async fn test_replace_keeps_reconciled_at<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S,
    S: EventStore,
{
    const SCENARIO: &str = "replace_keeps_reconciled_at";

    let store = make_store();
    let created = create_event(SCENARIO, &store, "stamp").await?;

    let stamped = store
        .replace(created.clone().reconciled(Utc::now()))
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "replace", error))?;
    let Some(stamp) = stamped.reconciled_at else {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            "replace dropped the reconciliation stamp",
        ));
    };

    // A stale copy without the stamp must not clear it
    let _ = store
        .replace(created.clone())
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "replace", error))?;
    let loaded = store
        .get(created.id)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "get", error))?;

    if loaded.reconciled_at != Some(stamp) {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!(
                "reconciled_at changed from {stamp} to {:?}",
                loaded.reconciled_at
            ),
        ));
    }

    Ok(())
}

/// `find_by_ids` returns the known ids and skips the rest.
pub async fn test_find_by_ids_skips_missing<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S,
    S: EventStore,
{
    const SCENARIO: &str = "find_by_ids_skips_missing";

    let store = make_store();
    let first = create_event(SCENARIO, &store, "first").await?;
    let second = create_event(SCENARIO, &store, "second").await?;
    let missing = EventId::generate();

    let found = store
        .find_by_ids(&[second.id, missing, first.id])
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "find_by_ids", error))?;
    let ids: HashSet<EventId> = found.iter().map(|event| event.id).collect();

    let expected: HashSet<EventId> = [first.id, second.id].into_iter().collect();
    if found.len() != 2 || ids != expected {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected exactly {expected:?}, found {ids:?}"),
        ));
    }

    Ok(())
}

/// A deleted event is gone, and deleting it again is `NotFound`.
pub async fn test_delete_removes_event<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S,
    S: EventStore,
{
    const SCENARIO: &str = "delete_removes_event";

    let store = make_store();
    let created = create_event(SCENARIO, &store, "doomed").await?;

    store
        .delete(created.id)
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "delete", error))?;

    if !matches!(
        store.get(created.id).await,
        Err(EventStoreError::NotFound { .. })
    ) {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            "deleted event is still readable",
        ));
    }

    if !matches!(
        store.delete(created.id).await,
        Err(EventStoreError::NotFound { .. })
    ) {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            "deleting twice must report NotFound",
        ));
    }

    Ok(())
}

/// `all` lists events in creation order.
pub async fn test_all_lists_oldest_first<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S,
    S: EventStore,
{
    const SCENARIO: &str = "all_lists_oldest_first";

    let store = make_store();
    let first = create_event(SCENARIO, &store, "first").await?;
    let second = create_event(SCENARIO, &store, "second").await?;

    let all = store
        .all()
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "all", error))?;
    let position = |id: EventId| all.iter().position(|event| event.id == id);

    match (position(first.id), position(second.id)) {
        (Some(first), Some(second)) if first < second => Ok(()),
        positions => Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected both events in creation order, positions {positions:?}"),
        )),
    }
}

/// `find_unreconciled` honors the cutoff, the cursor and the limit, and skips reconciled events.
pub async fn test_find_unreconciled_filters<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S,
    S: EventStore,
{
    const SCENARIO: &str = "find_unreconciled_filters";

    let store = make_store();
    let pending = create_event(SCENARIO, &store, "pending").await?;
    let done = create_event(SCENARIO, &store, "done").await?;
    let _ = store
        .replace(done.clone().reconciled(Utc::now()))
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "replace", error))?;

    let limit = BatchSize::try_new(10_000)
        .map_err(|error| ContractTestFailure::assertion(SCENARIO, error.to_string()))?;
    let later = Utc::now() + chrono::Duration::seconds(1);
    let found = store
        .find_unreconciled(later, None, limit)
        .await
        .map_err(|error| {
            ContractTestFailure::store_error(SCENARIO, "find_unreconciled", error)
        })?;

    if !found.iter().any(|event| event.id == pending.id) {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            "un-reconciled event was not listed",
        ));
    }
    if found.iter().any(|event| event.id == done.id) {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            "reconciled event was listed",
        ));
    }

    // created_before is exclusive
    let earlier = store
        .find_unreconciled(pending.created_at, None, limit)
        .await
        .map_err(|error| {
            ContractTestFailure::store_error(SCENARIO, "find_unreconciled", error)
        })?;
    if earlier.iter().any(|event| event.id == pending.id) {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            "event created at the cutoff was listed",
        ));
    }

    let one = BatchSize::try_new(1)
        .map_err(|error| ContractTestFailure::assertion(SCENARIO, error.to_string()))?;
    let limited = store
        .find_unreconciled(later, None, one)
        .await
        .map_err(|error| {
            ContractTestFailure::store_error(SCENARIO, "find_unreconciled", error)
        })?;
    if limited.len() != 1 {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("limit of one returned {} events", limited.len()),
        ));
    }

    // paging past `pending` skips it
    let after_pending = store
        .find_unreconciled(later, Some(pending.id), limit)
        .await
        .map_err(|error| {
            ContractTestFailure::store_error(SCENARIO, "find_unreconciled", error)
        })?;
    if after_pending.iter().any(|event| event.id <= pending.id) {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            "cursor did not skip events at or before it",
        ));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Notification contracts
// ---------------------------------------------------------------------------

async fn await_subscription<S, F>(
    scenario: &'static str,
    store: &S,
    seen: &F,
) -> ContractTestResult
where
    S: EventStore,
    F: Fn(EventId) -> usize,
{
    loop {
        let warmup = create_event(scenario, store, "warmup").await?;
        tokio::time::sleep(Duration::from_millis(50)).await;
        if seen(warmup.id) > 0 {
            return Ok(());
        }
    }
}

/// Every `create` reaches a subscribed listener exactly once, carrying the id.
///
/// `make_backend` returns a store and a listener wired to the same channel.
/// Warm-up events are created until the listener proves it is subscribed.
pub async fn test_notify_on_write<F, S, N>(make_backend: F, count: usize) -> ContractTestResult
where
    F: Fn() -> (S, N),
    S: EventStore,
    N: NotificationListener + Send + Sync + 'static,
{
    const SCENARIO: &str = "notify_on_write";

    let (store, listener) = make_backend();
    let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let shutdown = CancellationToken::new();

    let listening = {
        let received = Arc::clone(&received);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let channel = Channel::events();
            listener
                .listen(&channel, shutdown, move |payload| {
                    let received = Arc::clone(&received);
                    async move {
                        received.lock().push(payload);
                    }
                })
                .await
        })
    };

    let seen = |id: EventId| {
        let payload = id.to_string();
        received.lock().iter().filter(|seen| **seen == payload).count()
    };

    let subscribed =
        tokio::time::timeout(PATIENCE, await_subscription(SCENARIO, &store, &seen)).await;
    match subscribed {
        Ok(result) => result?,
        Err(_) => {
            shutdown.cancel();
            return Err(ContractTestFailure::assertion(
                SCENARIO,
                "listener never received a warm-up notification",
            ));
        }
    }

    let mut created = Vec::with_capacity(count);
    for index in 0..count {
        created.push(create_event(SCENARIO, &store, &format!("event-{index}")).await?);
    }

    let delivered = tokio::time::timeout(PATIENCE, async {
        while created.iter().any(|event| seen(event.id) == 0) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;

    // Let any duplicate deliveries arrive before counting
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.cancel();
    let _ = listening.await;

    if delivered.is_err() {
        let missing = created.iter().filter(|event| seen(event.id) == 0).count();
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("{missing} of {count} notifications never arrived"),
        ));
    }
    if let Some(duplicate) = created.iter().find(|event| seen(event.id) != 1) {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!(
                "event {} was announced {} times",
                duplicate.id,
                seen(duplicate.id)
            ),
        ));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Suite macros
// ---------------------------------------------------------------------------

#[macro_export]
macro_rules! lock_factory_contract_tests {
    (suite = $suite:ident, make_locks = $make_locks:expr $(,)?) => {
        #[allow(non_snake_case)]
        mod $suite {
            use $crate::contract::{
                test_blocking_waiter_proceeds_after_release, test_categories_are_independent,
                test_failed_attempt_still_releases, test_lock_excludes_other_owners,
                test_release_is_idempotent,
            };

            #[tokio::test(flavor = "multi_thread")]
            async fn lock_excludes_other_owners_contract() {
                test_lock_excludes_other_owners($make_locks)
                    .await
                    .expect("lock factory contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn blocking_waiter_proceeds_after_release_contract() {
                test_blocking_waiter_proceeds_after_release($make_locks)
                    .await
                    .expect("lock factory contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn categories_are_independent_contract() {
                test_categories_are_independent($make_locks)
                    .await
                    .expect("lock factory contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn release_is_idempotent_contract() {
                test_release_is_idempotent($make_locks)
                    .await
                    .expect("lock factory contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn failed_attempt_still_releases_contract() {
                test_failed_attempt_still_releases($make_locks)
                    .await
                    .expect("lock factory contract failed");
            }
        }
    };
}

pub use lock_factory_contract_tests;

#[macro_export]
macro_rules! event_store_contract_tests {
    (suite = $suite:ident, make_store = $make_store:expr $(,)?) => {
        #[allow(non_snake_case)]
        mod $suite {
            use $crate::contract::{
                test_all_lists_oldest_first, test_create_then_get, test_delete_removes_event,
                test_find_by_ids_skips_missing, test_find_unreconciled_filters,
                test_missing_event_is_not_found, test_replace_keeps_reconciled_at,
            };

            #[tokio::test(flavor = "multi_thread")]
            async fn create_then_get_contract() {
                test_create_then_get($make_store)
                    .await
                    .expect("event store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn missing_event_is_not_found_contract() {
                test_missing_event_is_not_found($make_store)
                    .await
                    .expect("event store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn replace_keeps_reconciled_at_contract() {
                test_replace_keeps_reconciled_at($make_store)
                    .await
                    .expect("event store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn find_by_ids_skips_missing_contract() {
                test_find_by_ids_skips_missing($make_store)
                    .await
                    .expect("event store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn delete_removes_event_contract() {
                test_delete_removes_event($make_store)
                    .await
                    .expect("event store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn all_lists_oldest_first_contract() {
                test_all_lists_oldest_first($make_store)
                    .await
                    .expect("event store contract failed");
            }

            #[tokio::test(flavor = "multi_thread")]
            async fn find_unreconciled_filters_contract() {
                test_find_unreconciled_filters($make_store)
                    .await
                    .expect("event store contract failed");
            }
        }
    };
}

pub use event_store_contract_tests;

#[macro_export]
macro_rules! notification_contract_tests {
    (suite = $suite:ident, make_backend = $make_backend:expr $(,)?) => {
        #[allow(non_snake_case)]
        mod $suite {
            use $crate::contract::test_notify_on_write;

            #[tokio::test(flavor = "multi_thread")]
            async fn notify_on_write_contract() {
                test_notify_on_write($make_backend, 25)
                    .await
                    .expect("notification contract failed");
            }
        }
    };
}

pub use notification_contract_tests;
