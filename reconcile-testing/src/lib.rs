//! Test support for `reconcile` backends and controllers.
//!
//! - [`contract`]: backend-agnostic contract suites for `LockFactory`,
//!   `EventStore` and `NotificationListener`, instantiated per backend with
//!   [`lock_factory_contract_tests!`], [`event_store_contract_tests!`] and
//!   [`notification_contract_tests!`].
//! - [`chaos`]: an event store wrapper that injects store failures.
//! - [`recorder`]: handlers that record their invocations.

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
    meta_variable_misuse,
    non_ascii_idents,
    rust_2018_idioms,
    trivial_casts,
    unused_extern_crates,
    unused_must_use,
    unused_mut,
    unused_parens
)]

/// Failure injection for event stores.
pub mod chaos;
/// Backend contract suites.
pub mod contract;
/// Recording controller handlers.
pub mod recorder;

pub use chaos::*;
pub use recorder::{HandlerRecorder, RecordedCall};
