use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use reconcile::{ControllerHandler, DispatchContext, HandlerError};
use reconcile_types::{EventId, EventType, SourceId};

/// One handler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// Event the handler ran for
    pub event_id: EventId,
    /// Type of that event
    pub event_type: EventType,
    /// Record the handler was given
    pub source_id: SourceId,
    /// Whether the dispatcher held the event lock for this call.
    pub locked: bool,
}

#[derive(Debug, Default)]
struct Recording {
    calls: Mutex<Vec<RecordedCall>>,
    failures_left: AtomicUsize,
}

/// Records every call made to the handlers it hands out.
///
/// Clones share one recording, so a recorder can be kept by the test while
/// its handlers are registered with several dispatchers.
#[derive(Debug, Clone, Default)]
pub struct HandlerRecorder {
    recording: Arc<Recording>,
}

impl HandlerRecorder {
    /// A recorder whose handlers always succeed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls fail with `HandlerError::Rejected` after
    /// being recorded.
    #[must_use]
    pub fn failing_first(self, count: usize) -> Self {
        self.recording.failures_left.store(count, Ordering::SeqCst);
        self
    }

    /// A handler that records its calls here.
    pub fn handler(&self) -> impl ControllerHandler + 'static {
        let recording = Arc::clone(&self.recording);
        move |ctx: DispatchContext, source_id: SourceId| {
            let recording = Arc::clone(&recording);
            async move {
                recording.calls.lock().push(RecordedCall {
                    event_id: ctx.event_id(),
                    event_type: ctx.event_type(),
                    source_id,
                    locked: ctx.lock_owner().is_some(),
                });
                let failed = recording
                    .failures_left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                        left.checked_sub(1)
                    })
                    .is_ok();
                if failed {
                    Err(HandlerError::rejected("recorder configured to fail"))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Every recorded call, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.recording.calls.lock().clone()
    }

    /// Number of recorded calls.
    pub fn count(&self) -> usize {
        self.recording.calls.lock().len()
    }

    /// Number of calls for events of `event_type`.
    pub fn count_of(&self, event_type: EventType) -> usize {
        self.recording
            .calls
            .lock()
            .iter()
            .filter(|call| call.event_type == event_type)
            .count()
    }

    /// Number of calls for `event_id`.
    pub fn count_for(&self, event_id: EventId) -> usize {
        self.recording
            .calls
            .lock()
            .iter()
            .filter(|call| call.event_id == event_id)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile_types::Source;

    fn context(event_type: EventType) -> DispatchContext {
        DispatchContext::new(
            EventId::generate(),
            Source::try_new("Dinosaurs").expect("valid source"),
            event_type,
            None,
        )
    }

    #[tokio::test]
    async fn records_each_call() {
        let recorder = HandlerRecorder::new();
        let handler = recorder.handler();
        let rex = SourceId::try_new("rex").expect("valid source id");
        let ctx = context(EventType::Create);

        handler.handle(&ctx, &rex).await.expect("handler succeeds");
        handler
            .handle(&context(EventType::Delete), &rex)
            .await
            .expect("handler succeeds");

        assert_eq!(recorder.count(), 2);
        assert_eq!(recorder.count_of(EventType::Create), 1);
        assert_eq!(recorder.count_for(ctx.event_id()), 1);
        assert!(!recorder.calls()[0].locked);
    }

    #[tokio::test]
    async fn failing_first_fails_then_recovers() {
        let recorder = HandlerRecorder::new().failing_first(1);
        let handler = recorder.handler();
        let rex = SourceId::try_new("rex").expect("valid source id");
        let ctx = context(EventType::Update);

        assert!(handler.handle(&ctx, &rex).await.is_err());
        assert!(handler.handle(&ctx, &rex).await.is_ok());
        assert_eq!(recorder.count(), 2);
    }
}
