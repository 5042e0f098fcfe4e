//! The dispatcher: turns a delivered event id into handler invocations.

use std::sync::Arc;

use chrono::Utc;
use reconcile_types::{
    EventId, EventStore, LockCategory, LockFactory, OwnerToken, ResourceId,
};
use tracing::{debug, error, info, instrument, warn};

use crate::handler::DispatchContext;
use crate::registry::{ControllerConfig, ControllerRegistry};

/// Whether the dispatcher guards each delivery with a per-event lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventLocking {
    /// Take a non-blocking `(event id, Events)` lock before loading the
    /// event; a worker that cannot get it skips the delivery. Together with
    /// the reconciled check this runs each event's handlers once across all
    /// dispatchers.
    #[default]
    FailFast,
    /// No dispatch-level lock. Every dispatcher that receives a delivery may
    /// run the handlers; they must be idempotent.
    Disabled,
}

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Every handler succeeded and `reconciled_at` was stamped.
    Reconciled,
    /// The event was reconciled by an earlier delivery.
    AlreadyReconciled,
    /// No controller is registered for the event's `(source, event_type)`.
    Unrouted,
    /// Another dispatcher holds the event lock.
    LockHeldElsewhere,
    /// The event lock could not be attempted.
    LockFailed,
    /// The event could not be loaded, e.g. because the row vanished.
    LoadFailed,
    /// The handler at `index` failed; later handlers did not run.
    HandlerFailed { index: usize },
    /// Every handler succeeded but the reconciled stamp could not be saved.
    ReconcileFailed,
    /// The notification payload is not an event id.
    InvalidId,
}

impl DispatchOutcome {
    /// Whether this delivery stamped the event.
    pub const fn is_reconciled(self) -> bool {
        matches!(self, Self::Reconciled)
    }
}

/// Loads delivered events, runs their controllers and records reconciliation.
///
/// Failures are logged and reported as a `DispatchOutcome`; nothing here
/// returns an error, so one bad event never stops the listener feeding the
/// manager.
pub struct ControllerManager<S, L> {
    store: S,
    locks: L,
    registry: Arc<ControllerRegistry>,
    locking: EventLocking,
}

impl<S, L> ControllerManager<S, L>
where
    S: EventStore + Sync,
    L: LockFactory + Sync,
{
    /// Create a manager with an empty registry and `EventLocking::FailFast`.
    pub fn new(store: S, locks: L) -> Self {
        Self {
            store,
            locks,
            registry: Arc::new(ControllerRegistry::new()),
            locking: EventLocking::default(),
        }
    }

    /// Choose how deliveries are guarded.
    #[must_use]
    pub const fn with_event_locking(mut self, locking: EventLocking) -> Self {
        self.locking = locking;
        self
    }

    /// Share a registry with other managers.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<ControllerRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Register a controller. Handlers for an already known source are merged.
    pub fn add(&self, config: ControllerConfig) {
        self.registry.register(config);
    }

    /// The registry dispatch routes through.
    pub const fn registry(&self) -> &Arc<ControllerRegistry> {
        &self.registry
    }

    /// The event store events are loaded from and stamped in.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// The lock factory per-event locks come from.
    pub const fn locks(&self) -> &L {
        &self.locks
    }

    /// Dispatch the event whose id arrived as a notification payload.
    pub async fn handle(&self, payload: &str) -> DispatchOutcome {
        match EventId::parse(payload) {
            Ok(id) => self.handle_event_id(id).await,
            Err(error) => {
                warn!(
                    payload,
                    error = %error,
                    "[dispatch.invalid_id] notification payload is not an event id"
                );
                DispatchOutcome::InvalidId
            }
        }
    }

    /// Dispatch the event `id`, taking the per-event lock first when enabled.
    #[instrument(name = "dispatch.handle", skip(self, id), fields(event_id = %id))]
    pub async fn handle_event_id(&self, id: EventId) -> DispatchOutcome {
        let lock_owner = match self.locking {
            EventLocking::Disabled => None,
            EventLocking::FailFast => match self.lock_event(id).await {
                Ok(Some(owner)) => Some(owner),
                Ok(None) => return DispatchOutcome::LockHeldElsewhere,
                Err(outcome) => return outcome,
            },
        };

        let outcome = self.dispatch(id, lock_owner).await;

        if let Some(owner) = lock_owner {
            self.locks.release(&owner).await;
        }
        outcome
    }

    async fn lock_event(&self, id: EventId) -> Result<Option<OwnerToken>, DispatchOutcome> {
        let resource = ResourceId::from(&id);
        match self
            .locks
            .acquire_non_blocking(&resource, LockCategory::Events)
            .await
        {
            Ok(attempt) if attempt.acquired => Ok(Some(attempt.owner)),
            Ok(attempt) => {
                self.locks.release(&attempt.owner).await;
                debug!("[dispatch.lock_held] event is being handled by another dispatcher");
                Ok(None)
            }
            Err(error) => {
                error!(error = %error, "[dispatch.lock_failed] unable to attempt event lock");
                Err(DispatchOutcome::LockFailed)
            }
        }
    }

    async fn dispatch(&self, id: EventId, lock_owner: Option<OwnerToken>) -> DispatchOutcome {
        let event = match self.store.get(id).await {
            Ok(event) => event,
            Err(error) => {
                error!(error = %error, "[dispatch.load_failed] unable to load event");
                return DispatchOutcome::LoadFailed;
            }
        };

        if event.is_reconciled() {
            debug!("[dispatch.already_reconciled] event was reconciled earlier");
            return DispatchOutcome::AlreadyReconciled;
        }

        let handlers = self.registry.handlers_for(&event.source, event.event_type);
        if handlers.is_empty() {
            info!(
                source = %event.source,
                event_type = %event.event_type,
                "[dispatch.unrouted] no controllers registered for event"
            );
            return DispatchOutcome::Unrouted;
        }

        let ctx = DispatchContext::new(event.id, event.source.clone(), event.event_type, lock_owner);
        for (index, handler) in handlers.iter().enumerate() {
            if let Err(error) = handler.handle(&ctx, &event.source_id).await {
                error!(
                    source = %event.source,
                    source_id = %event.source_id,
                    event_type = %event.event_type,
                    handler = index,
                    error = %error,
                    "[dispatch.handler_failed] controller handler failed, event left unreconciled"
                );
                return DispatchOutcome::HandlerFailed { index };
            }
        }

        match self.store.replace(event.reconciled(Utc::now())).await {
            Ok(_) => {
                debug!("[dispatch.reconciled] all handlers succeeded");
                DispatchOutcome::Reconciled
            }
            Err(error) => {
                error!(error = %error, "[dispatch.reconcile_failed] unable to stamp event as reconciled");
                DispatchOutcome::ReconcileFailed
            }
        }
    }
}
