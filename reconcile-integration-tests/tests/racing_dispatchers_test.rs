//! Several controller servers racing for the same notifications.

use std::collections::HashSet;
use std::time::Duration;

use reconcile::{EventLocking, EventStore, EventType};
use reconcile_integration_tests::{Fleet, FleetConfig};
use reconcile_memory::InMemoryEventStore;
use reconcile_testing::HandlerRecorder;

const EVENTS: usize = 50;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fail_fast_locking_runs_each_create_handler_once() {
    init_tracing();

    // Given: three servers sharing one store and one lock table
    let recorder = HandlerRecorder::new();
    let fleet = Fleet::start(FleetConfig::default(), &recorder, |store: InMemoryEventStore| store).await;

    // When: fifty Create events are recorded
    let ids = fleet.create_events(EVENTS).await;
    assert_eq!(ids.len(), EVENTS);

    // Then: every event is reconciled and its handler ran exactly once
    assert!(
        fleet.reconciled_within(&ids, Duration::from_secs(10)).await,
        "all events should be reconciled"
    );
    assert_eq!(recorder.count_of(EventType::Create), EVENTS);
    for id in &ids {
        assert_eq!(recorder.count_for(*id), 1, "event {id} handled once");
    }
    assert!(recorder.calls().iter().all(|call| call.locked));

    let locks = fleet.locks.clone();
    let outcomes = fleet.shutdown().await;
    assert!(outcomes.iter().all(Result::is_ok));
    assert_eq!(locks.live_count(), 0, "no lock outlives its dispatch");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn disabled_locking_may_repeat_handlers_but_reconciles_everything() {
    init_tracing();

    // Given: three servers that do not lock deliveries
    let recorder = HandlerRecorder::new();
    let config = FleetConfig {
        locking: EventLocking::Disabled,
        ..FleetConfig::default()
    };
    let fleet = Fleet::start(config, &recorder, |store: InMemoryEventStore| store).await;

    // When: fifty Create events are recorded
    let ids = fleet.create_events(EVENTS).await;

    // Then: each handler ran between once and once per server
    assert!(fleet.reconciled_within(&ids, Duration::from_secs(10)).await);
    let calls = recorder.count_of(EventType::Create);
    assert!(
        (EVENTS..=EVENTS * 3).contains(&calls),
        "expected between {EVENTS} and {} calls, got {calls}",
        EVENTS * 3
    );
    let handled: HashSet<_> = recorder.calls().iter().map(|call| call.event_id).collect();
    assert_eq!(handled.len(), EVENTS);
    assert!(recorder.calls().iter().all(|call| !call.locked));

    let _ = fleet.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reconciled_at_never_changes_once_stamped() {
    // Given: a fleet that has reconciled a batch of events
    let recorder = HandlerRecorder::new();
    let fleet = Fleet::start(FleetConfig::default(), &recorder, |store: InMemoryEventStore| store).await;
    let ids = fleet.create_events(10).await;
    assert!(fleet.reconciled_within(&ids, Duration::from_secs(10)).await);
    let first: Vec<_> = fleet
        .store
        .find_by_ids(&ids)
        .await
        .expect("events load")
        .into_iter()
        .map(|event| event.reconciled_at)
        .collect();

    // When: every server is asked to dispatch every event again
    for server in &fleet.servers {
        for id in &ids {
            let _ = server.manager().handle(&id.to_string()).await;
        }
    }

    // Then: no handler ran again and the stamps are unchanged
    let second: Vec<_> = fleet
        .store
        .find_by_ids(&ids)
        .await
        .expect("events load")
        .into_iter()
        .map(|event| event.reconciled_at)
        .collect();
    assert_eq!(first, second);
    assert_eq!(recorder.count(), ids.len());

    let _ = fleet.shutdown().await;
}
