use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use nutype::nutype;

use crate::event::{Event, EventId, NewEvent};

/// Maximum number of events returned by a single `find_unreconciled` call.
#[nutype(
    validate(greater = 0),
    default = 100,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Display,
        Into,
        Default
    )
)]
pub struct BatchSize(usize);

/// Identifies the event store operation that failed.
///
/// Used by `EventStoreError::StoreFailure` to provide strongly-typed
/// identification of which operation encountered an infrastructure failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Inserting a new event row.
    Create,
    /// Publishing the notification for a new event.
    Notify,
    /// Loading a single event.
    Get,
    /// Persisting a modified event.
    Replace,
    /// Removing an event row.
    Delete,
    /// Loading events by id.
    FindByIds,
    /// Listing every event.
    All,
    /// Listing events that still await reconciliation.
    FindUnreconciled,
    /// Beginning a database transaction.
    BeginTransaction,
    /// Committing a database transaction.
    CommitTransaction,
    /// Applying schema migrations.
    Migrate,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Notify => write!(f, "notify"),
            Operation::Get => write!(f, "get"),
            Operation::Replace => write!(f, "replace"),
            Operation::Delete => write!(f, "delete"),
            Operation::FindByIds => write!(f, "find_by_ids"),
            Operation::All => write!(f, "all"),
            Operation::FindUnreconciled => write!(f, "find_unreconciled"),
            Operation::BeginTransaction => write!(f, "begin_transaction"),
            Operation::CommitTransaction => write!(f, "commit_transaction"),
            Operation::Migrate => write!(f, "migrate"),
        }
    }
}

/// Error type returned by event store operations.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EventStoreError {
    /// No live event with this id exists.
    #[error("event {id} not found")]
    NotFound { id: EventId },

    /// The event row was written but its notification could not be sent.
    ///
    /// No listener will hear about the event until a resync picks it up.
    #[error("event {id} was stored but its notification failed")]
    NotifyFailed { id: EventId },

    /// A stored row could not be decoded into an `Event`.
    #[error("stored event is malformed: {detail}")]
    MalformedRow { detail: String },

    /// Represents infrastructure failures surfaced by the backing store (e.g., connection drops).
    #[error("{operation} operation failed")]
    StoreFailure { operation: Operation },
}

/// Durable record of domain events.
///
/// Every successful `create` publishes exactly one notification whose payload
/// is the new event's id. Notifications never carry the event body;
/// consumers re-fetch with `get`.
///
/// `replace` must never clear an existing `reconciled_at`.
pub trait EventStore {
    /// Persist a new event and notify listeners of its id.
    fn create(
        &self,
        event: NewEvent,
    ) -> impl Future<Output = Result<Event, EventStoreError>> + Send;

    /// Load a live (not soft-deleted) event.
    fn get(&self, id: EventId) -> impl Future<Output = Result<Event, EventStoreError>> + Send;

    /// Overwrite a stored event, keeping any existing reconciliation stamp.
    fn replace(&self, event: Event)
        -> impl Future<Output = Result<Event, EventStoreError>> + Send;

    /// Remove an event. Housekeeping only; the dispatcher never deletes.
    fn delete(&self, id: EventId) -> impl Future<Output = Result<(), EventStoreError>> + Send;

    /// Load the live events among `ids`. Missing ids are skipped.
    fn find_by_ids(
        &self,
        ids: &[EventId],
    ) -> impl Future<Output = Result<Vec<Event>, EventStoreError>> + Send;

    /// Every live event, oldest first.
    fn all(&self) -> impl Future<Output = Result<Vec<Event>, EventStoreError>> + Send;

    /// Live events created before `created_before` whose `reconciled_at` is
    /// still unset, in id order, at most `limit` of them.
    ///
    /// With `after` set only events whose id sorts after it are returned, so
    /// callers page through the backlog by passing the last id they saw.
    fn find_unreconciled(
        &self,
        created_before: DateTime<Utc>,
        after: Option<EventId>,
        limit: BatchSize,
    ) -> impl Future<Output = Result<Vec<Event>, EventStoreError>> + Send;
}

/// Blanket implementation allowing `&T` to be used where `T: EventStore`.
impl<T> EventStore for &T
where
    T: EventStore + Sync,
{
    fn create(
        &self,
        event: NewEvent,
    ) -> impl Future<Output = Result<Event, EventStoreError>> + Send {
        (**self).create(event)
    }

    fn get(&self, id: EventId) -> impl Future<Output = Result<Event, EventStoreError>> + Send {
        (**self).get(id)
    }

    fn replace(
        &self,
        event: Event,
    ) -> impl Future<Output = Result<Event, EventStoreError>> + Send {
        (**self).replace(event)
    }

    fn delete(&self, id: EventId) -> impl Future<Output = Result<(), EventStoreError>> + Send {
        (**self).delete(id)
    }

    fn find_by_ids(
        &self,
        ids: &[EventId],
    ) -> impl Future<Output = Result<Vec<Event>, EventStoreError>> + Send {
        (**self).find_by_ids(ids)
    }

    fn all(&self) -> impl Future<Output = Result<Vec<Event>, EventStoreError>> + Send {
        (**self).all()
    }

    fn find_unreconciled(
        &self,
        created_before: DateTime<Utc>,
        after: Option<EventId>,
        limit: BatchSize,
    ) -> impl Future<Output = Result<Vec<Event>, EventStoreError>> + Send {
        (**self).find_unreconciled(created_before, after, limit)
    }
}

impl<T> EventStore for Arc<T>
where
    T: EventStore + Send + Sync,
{
    fn create(
        &self,
        event: NewEvent,
    ) -> impl Future<Output = Result<Event, EventStoreError>> + Send {
        (**self).create(event)
    }

    fn get(&self, id: EventId) -> impl Future<Output = Result<Event, EventStoreError>> + Send {
        (**self).get(id)
    }

    fn replace(
        &self,
        event: Event,
    ) -> impl Future<Output = Result<Event, EventStoreError>> + Send {
        (**self).replace(event)
    }

    fn delete(&self, id: EventId) -> impl Future<Output = Result<(), EventStoreError>> + Send {
        (**self).delete(id)
    }

    fn find_by_ids(
        &self,
        ids: &[EventId],
    ) -> impl Future<Output = Result<Vec<Event>, EventStoreError>> + Send {
        (**self).find_by_ids(ids)
    }

    fn all(&self) -> impl Future<Output = Result<Vec<Event>, EventStoreError>> + Send {
        (**self).all()
    }

    fn find_unreconciled(
        &self,
        created_before: DateTime<Utc>,
        after: Option<EventId>,
        limit: BatchSize,
    ) -> impl Future<Output = Result<Vec<Event>, EventStoreError>> + Send {
        (**self).find_unreconciled(created_before, after, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_display_is_snake_case() {
        assert_eq!(Operation::FindUnreconciled.to_string(), "find_unreconciled");
        assert_eq!(Operation::BeginTransaction.to_string(), "begin_transaction");
        assert_eq!(Operation::Notify.to_string(), "notify");
    }

    #[test]
    fn store_failure_names_the_operation() {
        let error = EventStoreError::StoreFailure {
            operation: Operation::Replace,
        };
        assert_eq!(error.to_string(), "replace operation failed");
    }

    #[test]
    fn batch_size_rejects_zero_and_defaults_to_one_hundred() {
        assert!(BatchSize::try_new(0).is_err());
        assert_eq!(usize::from(BatchSize::default()), 100);
    }
}
