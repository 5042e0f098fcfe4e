//! Events whose first dispatch failed are picked up by the resync loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reconcile::{
    BatchSize, ControllerManager, EventLocking, EventStore, Operation, ResyncConfig, ServerConfig,
};
use reconcile_integration_tests::{Fleet, FleetConfig};
use reconcile_memory::InMemoryEventStore;
use reconcile_testing::{ChaosConfig, ChaosEventStore, ChaosEventStoreExt, HandlerRecorder};

fn fast_resync() -> ServerConfig {
    ServerConfig {
        resync: Some(ResyncConfig {
            interval: Duration::from_millis(50),
            min_age: Duration::ZERO,
            batch_size: BatchSize::default(),
        }),
        ..ServerConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_handlers_are_retried_by_resync() {
    // Given: one server whose handler fails its first five calls
    let recorder = HandlerRecorder::new().failing_first(5);
    let config = FleetConfig {
        servers: 1,
        server: fast_resync(),
        ..FleetConfig::default()
    };
    let fleet = Fleet::start(config, &recorder, |store: InMemoryEventStore| store).await;

    // When: five events are recorded, each failing its notified dispatch
    let ids = fleet.create_events(5).await;

    // Then: resync eventually reconciles every one of them
    assert!(fleet.reconciled_within(&ids, Duration::from_secs(10)).await);
    for id in &ids {
        assert!(recorder.count_for(*id) >= 1);
    }
    assert!(recorder.count() >= 10);

    let _ = fleet.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn flaky_reconcile_writes_are_recovered() {
    // Given: three servers whose stamp writes fail half the time
    let recorder = HandlerRecorder::new();
    let config = FleetConfig {
        server: fast_resync(),
        ..FleetConfig::default()
    };
    let chaos = ChaosConfig::deterministic()
        .with_failure_probability(0.5)
        .only(&[Operation::Replace]);
    let fleet = Fleet::start(config, &recorder, |store: InMemoryEventStore| -> ChaosEventStore<_> {
        store.with_chaos(chaos.clone())
    })
    .await;

    // When: twenty events are recorded
    let ids = fleet.create_events(20).await;

    // Then: they all end up reconciled, at the cost of repeated handler calls
    assert!(fleet.reconciled_within(&ids, Duration::from_secs(15)).await);
    for id in &ids {
        assert!(recorder.count_for(*id) >= 1);
    }
    let unreconciled = fleet
        .store
        .find_unreconciled(Utc::now(), None, BatchSize::default())
        .await
        .expect("scan");
    assert!(unreconciled.is_empty());

    let outcomes = fleet.shutdown().await;
    assert!(outcomes.iter().all(Result::is_ok));
}

#[tokio::test(flavor = "multi_thread")]
async fn manual_resync_reports_what_it_reconciled() {
    // Given: a fleet with no running resync where every stamp write is lost
    let recorder = HandlerRecorder::new();
    let fleet = Fleet::start(
        FleetConfig {
            servers: 1,
            ..FleetConfig::default()
        },
        &recorder,
        |store: InMemoryEventStore| {
            store.with_chaos(
                ChaosConfig::deterministic()
                    .with_failure_probability(1.0)
                    .only(&[Operation::Replace]),
            )
        },
    )
    .await;
    let ids = fleet.create_events(3).await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while recorder.count() < ids.len() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("notified dispatches ran");

    // When: a healthy manager over the same store resyncs
    let healthy = ControllerManager::new(fleet.store.clone(), fleet.locks.clone())
        .with_event_locking(EventLocking::Disabled)
        .with_registry(Arc::clone(fleet.servers[0].manager().registry()));
    let report = healthy
        .resync(Duration::ZERO, BatchSize::default())
        .await
        .expect("resync scan");

    // Then: all three were examined and reconciled
    assert_eq!(report.examined, 3);
    assert_eq!(report.reconciled, 3);
    assert_eq!(recorder.count(), 6);
    assert!(fleet.reconciled_within(&ids, Duration::from_secs(1)).await);

    let _ = fleet.shutdown().await;
}
