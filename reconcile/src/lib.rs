//! `reconcile` - event-driven controllers without a message broker
//!
//! Business services record an `Event` after every mutation. The event
//! store publishes the new event's id on a notification channel; controller
//! servers listen on that channel, load the event, run the handlers
//! registered for its `(source, event_type)` and stamp it reconciled once
//! they all succeed. Advisory locks keep competing servers from handling the
//! same event twice, and a periodic resync re-dispatches events whose
//! notification was missed or whose handlers failed.
//!
//! Backends live in `reconcile-postgres` and `reconcile-memory`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod handler;
mod manager;
mod registry;
mod resync;
mod server;

pub use handler::{ControllerHandler, DispatchContext, HandlerError};
pub use manager::{ControllerManager, DispatchOutcome, EventLocking};
pub use registry::{ControllerConfig, ControllerRegistry};
pub use resync::{ResyncConfig, ResyncReport};
pub use server::{ControllerServer, ServerConfig};

pub use reconcile_types::{
    fnv1a_32, run_listener, BatchSize, Channel, Event, EventId, EventStore, EventStoreError,
    EventType, IdleInterval, ListenerError, LockAttempt, LockCategory, LockError, LockFactory,
    LockKey, NewEvent, Notification, NotificationConnection, NotificationListener, Operation,
    OwnerToken, ResourceId, Source, SourceId, EVENTS_CHANNEL,
};
