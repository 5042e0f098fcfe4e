//! The "Dinosaurs" business service
//!
//! A small resource service that records an event after every mutation and
//! provides the idempotent handlers its controller runs. Records live in
//! memory; the events and locks come from whichever backend the service is
//! built with.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use nutype::nutype;
use parking_lot::RwLock;
use reconcile::{
    ControllerConfig, ControllerHandler, ControllerManager, DispatchContext, EventStore,
    EventStoreError, EventType, HandlerError, LockCategory, LockError, LockFactory, NewEvent,
    ResourceId, Source, SourceId,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

/// Source name carried by every dinosaur event.
pub const DINOSAURS: &str = "Dinosaurs";

/// [`DINOSAURS`] as a `Source`.
pub fn dinosaurs_source() -> Source {
    match Source::try_new(DINOSAURS) {
        Ok(source) => source,
        Err(_) => unreachable!(),
    }
}

/// A dinosaur's species, e.g. "Tyrannosaurus"
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct Species(String);

/// A dinosaur record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dinosaur {
    /// Also the `source_id` of its events
    pub id: SourceId,
    /// Current species
    pub species: Species,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// When the species last changed
    pub updated_at: DateTime<Utc>,
}

/// Failures of the Dinosaurs service.
#[derive(Debug, Error)]
pub enum DinosaurError {
    /// No dinosaur with this id.
    #[error("dinosaur {id} not found")]
    NotFound { id: SourceId },

    /// The change was applied but its event could not be recorded.
    #[error("failed to record dinosaur event")]
    Event(#[from] EventStoreError),

    /// The dinosaur's lock could not be taken.
    #[error("failed to lock dinosaur")]
    Lock(#[from] LockError),
}

impl From<DinosaurError> for HandlerError {
    fn from(error: DinosaurError) -> Self {
        match error {
            DinosaurError::Event(error) => Self::Store(error),
            DinosaurError::Lock(error) => Self::Lock(error),
            not_found @ DinosaurError::NotFound { .. } => Self::other(not_found),
        }
    }
}

fn new_dinosaur_id() -> SourceId {
    match SourceId::try_new(Uuid::now_v7().to_string()) {
        Ok(id) => id,
        Err(_) => unreachable!(),
    }
}

/// Dinosaur CRUD that emits `Create`, `Update` and `Delete` events.
pub struct DinosaurService<S, L> {
    dinosaurs: RwLock<HashMap<SourceId, Dinosaur>>,
    events: S,
    locks: L,
}

impl<S, L> DinosaurService<S, L>
where
    S: EventStore + Send + Sync + 'static,
    L: LockFactory + Send + Sync + 'static,
{
    /// A service with no dinosaurs that records events in `events`.
    pub fn new(events: S, locks: L) -> Self {
        Self {
            dinosaurs: RwLock::new(HashMap::new()),
            events,
            locks,
        }
    }

    async fn record(&self, id: &SourceId, event_type: EventType) -> Result<(), DinosaurError> {
        let event = self
            .events
            .create(NewEvent::new(dinosaurs_source(), id.clone(), event_type))
            .await?;
        info!(
            dinosaur = %id,
            event_id = %event.id,
            event_type = %event_type,
            "[dinosaurs.event] dinosaur event recorded"
        );
        Ok(())
    }

    /// Add a dinosaur and record a `Create` event.
    #[instrument(name = "dinosaurs.create", skip(self))]
    pub async fn create(&self, species: Species) -> Result<Dinosaur, DinosaurError> {
        let now = Utc::now().trunc_subsecs(6);
        let dinosaur = Dinosaur {
            id: new_dinosaur_id(),
            species,
            created_at: now,
            updated_at: now,
        };
        let _ = self
            .dinosaurs
            .write()
            .insert(dinosaur.id.clone(), dinosaur.clone());

        self.record(&dinosaur.id, EventType::Create).await?;
        Ok(dinosaur)
    }

    /// Look up a dinosaur.
    pub fn get(&self, id: &SourceId) -> Result<Dinosaur, DinosaurError> {
        self.dinosaurs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| DinosaurError::NotFound { id: id.clone() })
    }

    /// Every dinosaur, oldest first.
    pub fn all(&self) -> Vec<Dinosaur> {
        let mut all: Vec<Dinosaur> = self.dinosaurs.read().values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    /// Dinosaurs of one species, oldest first.
    pub fn find_by_species(&self, species: &Species) -> Vec<Dinosaur> {
        self.all()
            .into_iter()
            .filter(|dinosaur| &dinosaur.species == species)
            .collect()
    }

    /// Change a dinosaur's species.
    ///
    /// The read-modify-write runs under a blocking `(id, Dinosaurs)` lock so
    /// that concurrent replaces of one dinosaur apply one after another. An
    /// unchanged species is a no-op and records no event.
    #[instrument(name = "dinosaurs.replace", skip(self))]
    pub async fn replace(&self, id: &SourceId, species: Species) -> Result<Dinosaur, DinosaurError> {
        let resource = ResourceId::from(id);
        let replacing: std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<Dinosaur, DinosaurError>> + Send + '_>,
        > = Box::pin(self.locks.with_lock(
            &resource,
            LockCategory::Dinosaurs,
            |_owner| async {
                let found = self.get(id)?;
                if found.species == species {
                    return Ok(found);
                }

                let updated = Dinosaur {
                    species,
                    updated_at: Utc::now().trunc_subsecs(6),
                    ..found
                };
                let _ = self.dinosaurs.write().insert(id.clone(), updated.clone());
                self.record(id, EventType::Update).await?;
                Ok(updated)
            },
        ));
        replacing.await
    }

    /// Remove a dinosaur and record a `Delete` event.
    #[instrument(name = "dinosaurs.delete", skip(self))]
    pub async fn delete(&self, id: &SourceId) -> Result<(), DinosaurError> {
        let removed = self.dinosaurs.write().remove(id);
        if removed.is_none() {
            return Err(DinosaurError::NotFound { id: id.clone() });
        }
        self.record(id, EventType::Delete).await
    }

    /// Idempotent follow-up for `Create` and `Update` events.
    pub async fn on_upsert(&self, id: &SourceId) -> Result<(), DinosaurError> {
        let dinosaur = self.get(id)?;
        info!(
            dinosaur = %dinosaur.id,
            species = %dinosaur.species,
            "[dinosaurs.on_upsert] reconciling dinosaur"
        );
        Ok(())
    }

    /// Idempotent follow-up for `Delete` events.
    pub async fn on_delete(&self, id: &SourceId) -> Result<(), DinosaurError> {
        info!(dinosaur = %id, "[dinosaurs.on_delete] this dino didn't make it to the asteroid");
        Ok(())
    }

    /// The `Dinosaurs` controller: `on_upsert` for creates and updates,
    /// `on_delete` for deletes.
    pub fn controller(self: &Arc<Self>) -> ControllerConfig {
        let service = Arc::clone(self);
        let upsert: Arc<dyn ControllerHandler> =
            Arc::new(move |_ctx: DispatchContext, id: SourceId| {
                let service = Arc::clone(&service);
                async move { service.on_upsert(&id).await.map_err(HandlerError::from) }
            });
        let service = Arc::clone(self);

        ControllerConfig::new(dinosaurs_source())
            .on_shared(EventType::Create, Arc::clone(&upsert))
            .on_shared(EventType::Update, upsert)
            .on(
                EventType::Delete,
                move |_ctx: DispatchContext, id: SourceId| {
                    let service = Arc::clone(&service);
                    async move { service.on_delete(&id).await.map_err(HandlerError::from) }
                },
            )
    }

    /// Register the `Dinosaurs` controller with `manager`.
    pub fn register<MS, ML>(self: &Arc<Self>, manager: &ControllerManager<MS, ML>)
    where
        MS: EventStore + Sync,
        ML: LockFactory + Sync,
    {
        manager.add(self.controller());
    }
}
