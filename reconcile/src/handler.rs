//! Controller handlers and the context they run in.

use std::future::Future;

use async_trait::async_trait;
use reconcile_types::{EventId, EventStoreError, EventType, LockError, OwnerToken, Source, SourceId};

/// Error returned by a controller handler.
///
/// Any error stops the handler chain for the event being dispatched and
/// leaves it un-reconciled.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The handler's own store call failed.
    #[error(transparent)]
    Store(#[from] EventStoreError),

    /// The handler could not take a lock it needed.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// A business rule rejected the event.
    #[error("{0}")]
    Rejected(String),

    /// Any other failure.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl HandlerError {
    /// Reject the event with a human-readable reason.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }

    /// Wrap an arbitrary error.
    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Other(Box::new(error))
    }
}

/// What a handler knows about the delivery it is serving.
///
/// When the dispatcher took the per-event lock, `lock_owner` is its token.
/// Handlers may pass it to helpers that want to know whether the event is
/// guarded; releasing it is the dispatcher's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchContext {
    event_id: EventId,
    source: Source,
    event_type: EventType,
    lock_owner: Option<OwnerToken>,
}

impl DispatchContext {
    /// Build the context for one delivery.
    pub const fn new(
        event_id: EventId,
        source: Source,
        event_type: EventType,
        lock_owner: Option<OwnerToken>,
    ) -> Self {
        Self {
            event_id,
            source,
            event_type,
            lock_owner,
        }
    }

    /// Id of the event being dispatched.
    pub const fn event_id(&self) -> EventId {
        self.event_id
    }

    /// Source of the event being dispatched.
    pub const fn source(&self) -> &Source {
        &self.source
    }

    /// Type of the event being dispatched.
    pub const fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Owner token of the per-event lock, when the dispatcher holds one.
    pub const fn lock_owner(&self) -> Option<OwnerToken> {
        self.lock_owner
    }
}

/// A unit of reconciliation work run for `(source, event_type)`.
///
/// Handlers receive the id of the business record the event describes and
/// must be idempotent: an event whose chain failed part way is run again
/// from the first handler by the resync loop.
///
/// Closures `Fn(DispatchContext, SourceId) -> impl Future<Output = Result<(), HandlerError>>`
/// implement this trait.
#[async_trait]
pub trait ControllerHandler: Send + Sync {
    /// Reconcile the record `source_id` for the delivery described by `ctx`.
    async fn handle(&self, ctx: &DispatchContext, source_id: &SourceId)
        -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> ControllerHandler for F
where
    F: Fn(DispatchContext, SourceId) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(
        &self,
        ctx: &DispatchContext,
        source_id: &SourceId,
    ) -> Result<(), HandlerError> {
        self(ctx.clone(), source_id.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile_types::Operation;

    fn context() -> DispatchContext {
        DispatchContext::new(
            EventId::generate(),
            Source::try_new("Dinosaurs").expect("valid source"),
            EventType::Create,
            None,
        )
    }

    #[tokio::test]
    async fn closures_are_handlers() {
        let handler = |ctx: DispatchContext, source_id: SourceId| async move {
            if ctx.event_type() == EventType::Create && source_id.as_ref() == "rex" {
                Ok(())
            } else {
                Err(HandlerError::rejected("unexpected delivery"))
            }
        };

        let source_id = SourceId::try_new("rex").expect("valid source id");
        assert!(handler.handle(&context(), &source_id).await.is_ok());
    }

    #[test]
    fn store_errors_convert_into_handler_errors() {
        let error: HandlerError = EventStoreError::StoreFailure {
            operation: Operation::Get,
        }
        .into();
        assert_eq!(error.to_string(), "get operation failed");
    }
}
