use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reconcile_types::{
    BatchSize, Channel, Event, EventId, EventStore, EventStoreError, IdleInterval, NewEvent,
    Notification,
};
use tokio::sync::broadcast;
use tracing::{debug, instrument};

use crate::InMemoryListener;

const NOTIFICATION_CAPACITY: usize = 1024;

/// Thread-safe in-memory event store.
///
/// Clones share the same rows and the same notification channel. Events are
/// kept in id order, which for UUIDv7 ids is creation order.
#[derive(Clone)]
pub struct InMemoryEventStore {
    events: Arc<Mutex<BTreeMap<EventId, Event>>>,
    notifications: broadcast::Sender<Notification>,
}

impl InMemoryEventStore {
    /// Create a new empty in-memory event store.
    pub fn new() -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            events: Arc::new(Mutex::new(BTreeMap::new())),
            notifications,
        }
    }

    /// A listener that receives the ids of events created through this store.
    pub fn listener(&self) -> InMemoryListener {
        InMemoryListener::new(self.notifications.clone(), IdleInterval::default())
    }

    /// Number of listeners currently subscribed to this store's notifications.
    pub fn subscriber_count(&self) -> usize {
        self.notifications.receiver_count()
    }

    fn notify(&self, id: EventId) {
        let notification = Notification {
            channel: Channel::events(),
            payload: id.to_string(),
        };
        // No subscribers is not a failure: the event is still stored and a
        // resync will find it.
        if self.notifications.send(notification).is_err() {
            debug!(event_id = %id, "[memory.notify] no listeners subscribed");
        }
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore for InMemoryEventStore {
    #[instrument(name = "memory.create", skip(self))]
    async fn create(&self, event: NewEvent) -> Result<Event, EventStoreError> {
        let event = Event::from_new(event);
        let _ = self.events.lock().insert(event.id, event.clone());
        self.notify(event.id);
        Ok(event)
    }

    async fn get(&self, id: EventId) -> Result<Event, EventStoreError> {
        self.events
            .lock()
            .get(&id)
            .filter(|event| event.deleted_at.is_none())
            .cloned()
            .ok_or(EventStoreError::NotFound { id })
    }

    #[instrument(name = "memory.replace", skip(self, event), fields(event_id = %event.id))]
    async fn replace(&self, mut event: Event) -> Result<Event, EventStoreError> {
        let mut events = self.events.lock();
        let Some(stored) = events.get_mut(&event.id) else {
            return Err(EventStoreError::NotFound { id: event.id });
        };
        event.reconciled_at = stored.reconciled_at.or(event.reconciled_at);
        *stored = event.clone();
        Ok(event)
    }

    async fn delete(&self, id: EventId) -> Result<(), EventStoreError> {
        match self.events.lock().remove(&id) {
            Some(_) => Ok(()),
            None => Err(EventStoreError::NotFound { id }),
        }
    }

    async fn find_by_ids(&self, ids: &[EventId]) -> Result<Vec<Event>, EventStoreError> {
        let events = self.events.lock();
        Ok(ids
            .iter()
            .filter_map(|id| events.get(id))
            .filter(|event| event.deleted_at.is_none())
            .cloned()
            .collect())
    }

    async fn all(&self) -> Result<Vec<Event>, EventStoreError> {
        Ok(self
            .events
            .lock()
            .values()
            .filter(|event| event.deleted_at.is_none())
            .cloned()
            .collect())
    }

    async fn find_unreconciled(
        &self,
        created_before: DateTime<Utc>,
        after: Option<EventId>,
        limit: BatchSize,
    ) -> Result<Vec<Event>, EventStoreError> {
        let limit: usize = limit.into();
        let events = self.events.lock();
        let range = match after {
            Some(after) => events.range((Bound::Excluded(after), Bound::Unbounded)),
            None => events.range(..),
        };
        Ok(range
            .map(|(_, event)| event)
            .filter(|event| {
                event.deleted_at.is_none()
                    && event.reconciled_at.is_none()
                    && event.created_at < created_before
            })
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile_types::{EventType, Source, SourceId};

    fn new_event(source_id: &str) -> NewEvent {
        NewEvent::new(
            Source::try_new("Dinosaurs").expect("valid source"),
            SourceId::try_new(source_id).expect("valid source id"),
            EventType::Create,
        )
    }

    #[tokio::test]
    async fn create_broadcasts_event_id_to_subscribers() {
        // Given: a subscriber on the store's channel
        let store = InMemoryEventStore::new();
        let mut receiver = store.notifications.subscribe();

        // When: an event is created
        let event = store.create(new_event("rex")).await.expect("create");

        // Then: the subscriber receives exactly that id
        let notification = receiver.recv().await.expect("notification");
        assert_eq!(notification.payload, event.id.to_string());
        assert_eq!(notification.channel, Channel::events());
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn create_without_subscribers_still_stores_event() {
        let store = InMemoryEventStore::new();

        let event = store.create(new_event("rex")).await.expect("create");

        assert_eq!(store.get(event.id).await, Ok(event));
    }

    #[tokio::test]
    async fn soft_deleted_events_are_invisible() {
        // Given: a stored event marked deleted
        let store = InMemoryEventStore::new();
        let mut event = store.create(new_event("rex")).await.expect("create");
        event.deleted_at = Some(Utc::now());
        let event = store.replace(event).await.expect("replace");

        // Then: reads skip it
        assert_eq!(
            store.get(event.id).await,
            Err(EventStoreError::NotFound { id: event.id })
        );
        assert!(store.all().await.expect("all").is_empty());
        assert!(store
            .find_by_ids(&[event.id])
            .await
            .expect("find")
            .is_empty());
    }

    #[tokio::test]
    async fn find_unreconciled_respects_limit_and_age() {
        // Given: three unreconciled events and one reconciled one
        let store = InMemoryEventStore::new();
        let mut created = Vec::new();
        for source_id in ["a", "b", "c", "d"] {
            created.push(store.create(new_event(source_id)).await.expect("create"));
        }
        let reconciled = created[0].clone().reconciled(Utc::now());
        let _ = store.replace(reconciled).await.expect("replace");
        let cutoff = Utc::now() + chrono::Duration::seconds(1);

        // When: asking for at most two
        let pending = store
            .find_unreconciled(cutoff, None, BatchSize::try_new(2).expect("valid batch size"))
            .await
            .expect("find_unreconciled");

        // Then: the two oldest unreconciled events come back
        let ids: Vec<EventId> = pending.iter().map(|event| event.id).collect();
        assert_eq!(ids, vec![created[1].id, created[2].id]);

        // And: nothing is old enough before the first event was created
        let none = store
            .find_unreconciled(created[0].created_at, None, BatchSize::default())
            .await
            .expect("find_unreconciled");
        assert!(none.is_empty());

        // And: the page after the second event starts at the third
        let next = store
            .find_unreconciled(cutoff, Some(created[2].id), BatchSize::default())
            .await
            .expect("find_unreconciled");
        let ids: Vec<EventId> = next.iter().map(|event| event.id).collect();
        assert_eq!(ids, vec![created[3].id]);
    }
}
