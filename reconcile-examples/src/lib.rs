//! Example services built on `reconcile`.
//!
//! [`dinosaurs`] is a small business service that records an event for every
//! mutation and registers a controller for its own events. The
//! `controller_server` binary runs that controller against Postgres.

/// The Dinosaurs service and its controller.
pub mod dinosaurs;

pub use dinosaurs::{Dinosaur, DinosaurError, DinosaurService, Species, DINOSAURS};
