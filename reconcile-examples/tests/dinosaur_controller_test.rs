use std::sync::Arc;
use std::time::Duration;

use reconcile::{ControllerManager, ControllerServer, EventStore, ServerConfig};
use reconcile_examples::{DinosaurService, Species};
use reconcile_memory::{InMemoryEventStore, InMemoryLockFactory};
use tokio_util::sync::CancellationToken;

async fn wait_until_all_reconciled(store: &InMemoryEventStore, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let events = store.all().await.expect("events listed");
            if events.len() == expected && events.iter().all(reconcile::Event::is_reconciled) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("every dinosaur event should be reconciled");
}

#[tokio::test(flavor = "multi_thread")]
async fn dinosaur_lifecycle_is_reconciled_by_a_running_server() {
    // Given: a controller server running the Dinosaurs controller
    let store = InMemoryEventStore::new();
    let locks = InMemoryLockFactory::new();
    let dinosaurs = Arc::new(DinosaurService::new(store.clone(), locks.clone()));
    let manager = ControllerManager::new(store.clone(), locks.clone());
    dinosaurs.register(&manager);
    let server = Arc::new(
        ControllerServer::new(manager, store.listener()).with_config(ServerConfig {
            resync: None,
            ..ServerConfig::default()
        }),
    );
    let shutdown = CancellationToken::new();
    let running = {
        let server = Arc::clone(&server);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { server.run(shutdown).await })
    };
    tokio::time::timeout(Duration::from_secs(5), async {
        while store.subscriber_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("server subscribes");

    // When: a dinosaur is created and renamed, and another is created and deleted
    let rex = dinosaurs
        .create(Species::try_new("Tyrannosaurus").expect("valid species"))
        .await
        .expect("created");
    let _ = dinosaurs
        .replace(&rex.id, Species::try_new("Allosaurus").expect("valid species"))
        .await
        .expect("replaced");
    let doomed = dinosaurs
        .create(Species::try_new("Dodo").expect("valid species"))
        .await
        .expect("created");
    // on_upsert needs the record, so let its create settle before deleting
    wait_until_all_reconciled(&store, 3).await;
    dinosaurs.delete(&doomed.id).await.expect("deleted");

    // Then: all four events end up reconciled and no lock is left behind
    wait_until_all_reconciled(&store, 4).await;

    shutdown.cancel();
    assert_eq!(running.await.expect("server joins"), Ok(()));
    assert_eq!(locks.live_count(), 0);
}
