use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reconcile::{
    ControllerConfig, ControllerManager, ControllerServer, DispatchContext, EventStore, EventType,
    HandlerError, NewEvent, ServerConfig, Source, SourceId,
};
use reconcile_memory::{InMemoryEventStore, InMemoryLockFactory};
use tokio_util::sync::CancellationToken;

fn dinosaurs() -> Source {
    Source::try_new("Dinosaurs").expect("valid source")
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition should hold within 5s");
}

#[tokio::test(flavor = "multi_thread")]
async fn server_reconciles_notified_events_and_stops_on_shutdown() {
    // Given: a running server with one Create handler
    let store = InMemoryEventStore::new();
    let manager = ControllerManager::new(store.clone(), InMemoryLockFactory::new());
    let server = Arc::new(
        ControllerServer::new(manager, store.listener()).with_config(ServerConfig {
            resync: None,
            ..ServerConfig::default()
        }),
    );
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    server.add(ControllerConfig::new(dinosaurs()).on(
        EventType::Create,
        move |_ctx: DispatchContext, _source_id: SourceId| {
            let counted = Arc::clone(&counted);
            async move {
                let _ = counted.fetch_add(1, Ordering::SeqCst);
                Ok::<(), HandlerError>(())
            }
        },
    ));
    let shutdown = CancellationToken::new();
    let running = {
        let server = Arc::clone(&server);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { server.run(shutdown).await })
    };
    wait_until(|| store.subscriber_count() == 1).await;

    // When: an event is created
    let event = store
        .create(NewEvent::new(
            dinosaurs(),
            SourceId::try_new("rex").expect("valid source id"),
            EventType::Create,
        ))
        .await
        .expect("create");
    wait_until(|| calls.load(Ordering::SeqCst) == 1).await;

    // Then: the event ends up reconciled and the server stops cleanly
    let store_for_check = store.clone();
    tokio::time::timeout(Duration::from_secs(5), async move {
        while !store_for_check
            .get(event.id)
            .await
            .expect("get")
            .is_reconciled()
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("event should be reconciled");

    shutdown.cancel();
    let outcome = running.await.expect("server task joins");
    assert_eq!(outcome, Ok(()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
