#![forbid(
    invalid_value,
    overflowing_literals,
    unconditional_recursion,
    unused_allocation,
    unsafe_code
)]
#![deny(
    bad_style,
    deprecated,
    non_ascii_idents,
    non_camel_case_types,
    non_snake_case,
    non_upper_case_globals,
    rust_2018_idioms,
    trivial_casts,
    unused_extern_crates,
    unused_must_use,
    unused_mut,
    unused_parens
)]

//! Shared vocabulary types and traits for the reconcile controller framework.
//!
//! This crate provides the foundational types that are shared between the main
//! `reconcile` crate and backend implementations like `reconcile-postgres` and
//! `reconcile-memory`. Keeping them here lets every backend implement the same
//! seams without depending on the dispatcher.
//!
//! # Overview
//!
//! This crate contains:
//! - Domain types: `Event`, `NewEvent`, `EventId`, `Source`, `SourceId`, `EventType`
//! - Lock types: `ResourceId`, `LockCategory`, `OwnerToken`, `LockKey`, `LockAttempt`
//! - Core traits: `EventStore`, `LockFactory`, `NotificationListener`, `NotificationConnection`
//! - The shared listener loop: `run_listener`
//! - Errors: `EventStoreError`, `LockError`, `ListenerError`, `Operation`

mod event;
mod listener;
mod lock;
mod store;

pub use event::{Event, EventId, EventType, NewEvent, Source, SourceId, UnknownEventType};
pub use listener::{
    run_listener, Channel, IdleInterval, ListenerError, Notification, NotificationConnection,
    NotificationListener, EVENTS_CHANNEL,
};
pub use lock::{
    fnv1a_32, LockAttempt, LockCategory, LockError, LockFactory, LockKey, OwnerToken, ResourceId,
    UnknownLockCategory,
};
pub use store::{BatchSize, EventStore, EventStoreError, Operation};
