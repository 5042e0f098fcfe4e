use std::future::Future;

use chrono::{DateTime, Utc};
use nutype::nutype;
use parking_lot::Mutex;
use rand::{random, rngs::StdRng, Rng, SeedableRng};
use reconcile_types::{
    BatchSize, Event, EventId, EventStore, EventStoreError, NewEvent, Operation,
};

/// Probability value for chaos engineering injection rates.
///
/// Probability represents a value in the range [0.0, 1.0] where 0.0 means
/// never inject failures and 1.0 means always inject failures.
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Display, Into)
)]
pub struct Probability(f32);

impl Probability {
    /// Clamp `value` into range.
    fn clamped(value: f32) -> Self {
        match Self::try_new(value.clamp(0.0, 1.0)) {
            Ok(probability) => probability,
            // NaN is the only value clamp leaves out of range
            Err(_) => Self::never(),
        }
    }

    fn never() -> Self {
        match Self::try_new(0.0) {
            Ok(probability) => probability,
            Err(_) => unreachable!(),
        }
    }
}

/// Which store operations fail, and how often.
#[derive(Debug, Clone)]
pub struct ChaosConfig {
    deterministic_seed: Option<u64>,
    failure_probability: Probability,
    operations: Option<Vec<Operation>>,
}

impl ChaosConfig {
    /// Seed the failure RNG so runs repeat.
    pub fn deterministic() -> Self {
        Self {
            deterministic_seed: Some(0),
            ..Self::default()
        }
    }

    /// Fail targeted calls with `probability`, clamped to [0.0, 1.0].
    #[must_use]
    pub fn with_failure_probability(mut self, probability: f32) -> Self {
        self.failure_probability = Probability::clamped(probability);
        self
    }

    /// Only inject failures into `operations`; others always pass through.
    #[must_use]
    pub fn only(mut self, operations: &[Operation]) -> Self {
        self.operations = Some(operations.to_vec());
        self
    }

    fn targets(&self, operation: Operation) -> bool {
        match &self.operations {
            Some(operations) => operations.contains(&operation),
            None => true,
        }
    }
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            deterministic_seed: None,
            failure_probability: Probability::never(),
            operations: None,
        }
    }
}

/// Wrap any event store in a [`ChaosEventStore`].
pub trait ChaosEventStoreExt: Sized {
    /// Inject failures into `self` according to `config`.
    fn with_chaos(self, config: ChaosConfig) -> ChaosEventStore<Self>;
}

/// Event store wrapper that fails a share of calls with `StoreFailure`.
///
/// A failed call does not reach the wrapped store.
pub struct ChaosEventStore<S> {
    store: S,
    config: ChaosConfig,
    rng: Mutex<StdRng>,
}

impl<S> ChaosEventStore<S> {
    /// Wrap `store`.
    pub fn new(store: S, config: ChaosConfig) -> Self {
        let rng = match config.deterministic_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::seed_from_u64(random()),
        };

        Self {
            store,
            config,
            rng: Mutex::new(rng),
        }
    }

    /// The wrapped store, bypassing injection.
    pub const fn inner(&self) -> &S {
        &self.store
    }

    fn should_fail(&self, operation: Operation) -> bool {
        if !self.config.targets(operation) {
            return false;
        }

        let probability: f32 = self.config.failure_probability.into();
        if probability <= 0.0 {
            return false;
        }
        if probability >= 1.0 {
            return true;
        }

        self.rng.lock().random_bool(f64::from(probability))
    }

    fn failure<T>(operation: Operation) -> Result<T, EventStoreError> {
        Err(EventStoreError::StoreFailure { operation })
    }
}

impl<S> EventStore for ChaosEventStore<S>
where
    S: EventStore + Sync,
{
    fn create(
        &self,
        event: NewEvent,
    ) -> impl Future<Output = Result<Event, EventStoreError>> + Send {
        let should_fail = self.should_fail(Operation::Create);
        let store = &self.store;

        async move {
            if should_fail {
                return Self::failure(Operation::Create);
            }
            store.create(event).await
        }
    }

    fn get(&self, id: EventId) -> impl Future<Output = Result<Event, EventStoreError>> + Send {
        let should_fail = self.should_fail(Operation::Get);
        let store = &self.store;

        async move {
            if should_fail {
                return Self::failure(Operation::Get);
            }
            store.get(id).await
        }
    }

    fn replace(
        &self,
        event: Event,
    ) -> impl Future<Output = Result<Event, EventStoreError>> + Send {
        let should_fail = self.should_fail(Operation::Replace);
        let store = &self.store;

        async move {
            if should_fail {
                return Self::failure(Operation::Replace);
            }
            store.replace(event).await
        }
    }

    fn delete(&self, id: EventId) -> impl Future<Output = Result<(), EventStoreError>> + Send {
        let should_fail = self.should_fail(Operation::Delete);
        let store = &self.store;

        async move {
            if should_fail {
                return Self::failure(Operation::Delete);
            }
            store.delete(id).await
        }
    }

    fn find_by_ids(
        &self,
        ids: &[EventId],
    ) -> impl Future<Output = Result<Vec<Event>, EventStoreError>> + Send {
        let should_fail = self.should_fail(Operation::FindByIds);
        let store = &self.store;
        let ids = ids.to_vec();

        async move {
            if should_fail {
                return Self::failure(Operation::FindByIds);
            }
            store.find_by_ids(&ids).await
        }
    }

    fn all(&self) -> impl Future<Output = Result<Vec<Event>, EventStoreError>> + Send {
        let should_fail = self.should_fail(Operation::All);
        let store = &self.store;

        async move {
            if should_fail {
                return Self::failure(Operation::All);
            }
            store.all().await
        }
    }

    fn find_unreconciled(
        &self,
        created_before: DateTime<Utc>,
        after: Option<EventId>,
        limit: BatchSize,
    ) -> impl Future<Output = Result<Vec<Event>, EventStoreError>> + Send {
        let should_fail = self.should_fail(Operation::FindUnreconciled);
        let store = &self.store;

        async move {
            if should_fail {
                return Self::failure(Operation::FindUnreconciled);
            }
            store.find_unreconciled(created_before, after, limit).await
        }
    }
}

impl<S> ChaosEventStoreExt for S
where
    S: EventStore + Sync,
{
    fn with_chaos(self, config: ChaosConfig) -> ChaosEventStore<Self> {
        ChaosEventStore::new(self, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile_memory::InMemoryEventStore;
    use reconcile_types::{EventType, Source, SourceId};

    fn new_event() -> NewEvent {
        NewEvent::new(
            Source::try_new("Dinosaurs").expect("valid source"),
            SourceId::try_new("rex").expect("valid source id"),
            EventType::Create,
        )
    }

    #[test]
    fn deterministic_config_sets_seed() {
        let default_is_none = ChaosConfig::default().deterministic_seed.is_none();
        let deterministic_is_some = ChaosConfig::deterministic().deterministic_seed.is_some();

        assert!(default_is_none && deterministic_is_some);
    }

    #[test]
    fn out_of_range_probabilities_are_clamped() {
        let config = ChaosConfig::default().with_failure_probability(3.0);
        let probability: f32 = config.failure_probability.into();
        assert!((probability - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn zero_probability_passes_through() {
        let store = InMemoryEventStore::new().with_chaos(ChaosConfig::deterministic());

        let created = store.create(new_event()).await.expect("create passes through");
        let loaded = store.get(created.id).await.expect("get passes through");

        assert_eq!(loaded, created);
    }

    #[tokio::test]
    async fn full_probability_fails_only_targeted_operations() {
        // Given: a store that always fails replace
        let store = InMemoryEventStore::new().with_chaos(
            ChaosConfig::deterministic()
                .with_failure_probability(1.0)
                .only(&[Operation::Replace]),
        );

        // When: an event is created and then replaced
        let created = store.create(new_event()).await.expect("create is not targeted");
        let replaced = store.replace(created.clone().reconciled(Utc::now())).await;

        // Then: only the replace failed and the stored event is untouched
        assert_eq!(
            replaced,
            Err(EventStoreError::StoreFailure {
                operation: Operation::Replace
            })
        );
        let stored = store.inner().get(created.id).await.expect("event stored");
        assert!(!stored.is_reconciled());
    }
}
