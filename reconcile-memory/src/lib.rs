//! In-memory backend for the `reconcile` controller framework
//!
//! This crate provides in-process implementations of the `EventStore`,
//! `LockFactory` and `NotificationListener` traits, useful for testing and
//! development scenarios where a database is not available. The store
//! broadcasts new event ids to every listener created from it, so several
//! dispatchers can compete for the same notifications the way separate
//! controller processes do against Postgres.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod listener;
mod lock;
mod store;

pub use listener::InMemoryListener;
pub use lock::InMemoryLockFactory;
pub use store::InMemoryEventStore;
