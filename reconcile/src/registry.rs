//! Typed routing table from `(source, event_type)` to ordered handler lists.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use reconcile_types::{EventType, Source};
use tracing::debug;

use crate::handler::ControllerHandler;

type HandlerList = Vec<Arc<dyn ControllerHandler>>;

/// The handlers one controller contributes for a single source.
///
/// ```ignore
/// let config = ControllerConfig::new(Source::try_new("Dinosaurs")?)
///     .on(EventType::Create, on_upsert)
///     .on(EventType::Delete, on_delete);
/// manager.add(config);
/// ```
pub struct ControllerConfig {
    source: Source,
    handlers: HashMap<EventType, HandlerList>,
}

impl ControllerConfig {
    /// Start a controller for `source` with no handlers.
    pub fn new(source: Source) -> Self {
        Self {
            source,
            handlers: HashMap::new(),
        }
    }

    /// Append `handler` to the chain for `event_type`.
    #[must_use]
    pub fn on<H>(self, event_type: EventType, handler: H) -> Self
    where
        H: ControllerHandler + 'static,
    {
        self.on_shared(event_type, Arc::new(handler))
    }

    /// Append an already shared handler, e.g. one registered for several event types.
    #[must_use]
    pub fn on_shared(mut self, event_type: EventType, handler: Arc<dyn ControllerHandler>) -> Self {
        self.handlers.entry(event_type).or_default().push(handler);
        self
    }

    /// The source this controller handles.
    pub const fn source(&self) -> &Source {
        &self.source
    }
}

/// Registered controllers, keyed by source then event type.
///
/// Registration normally finishes before dispatch starts, but the table is
/// behind a read/write lock so a late `register` is safe against in-flight
/// dispatches. Handler lists are cloned out of the lock before any handler
/// runs.
#[derive(Default)]
pub struct ControllerRegistry {
    routes: RwLock<HashMap<Source, HashMap<EventType, HandlerList>>>,
}

impl ControllerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `config` into the table.
    ///
    /// Handlers for a source that is already registered are appended after
    /// the existing ones, per event type; nothing is overwritten.
    pub fn register(&self, config: ControllerConfig) {
        let ControllerConfig { source, handlers } = config;
        let mut routes = self.routes.write();
        let by_type = routes.entry(source.clone()).or_default();
        for (event_type, mut list) in handlers {
            debug!(
                source = %source,
                event_type = %event_type,
                added = list.len(),
                "[registry.register] registering controller handlers"
            );
            by_type.entry(event_type).or_default().append(&mut list);
        }
    }

    /// Handlers for `(source, event_type)` in registration order.
    pub fn handlers_for(&self, source: &Source, event_type: EventType) -> HandlerList {
        self.routes
            .read()
            .get(source)
            .and_then(|by_type| by_type.get(&event_type))
            .cloned()
            .unwrap_or_default()
    }

    /// Number of handlers registered for `(source, event_type)`.
    pub fn handler_count(&self, source: &Source, event_type: EventType) -> usize {
        self.routes
            .read()
            .get(source)
            .and_then(|by_type| by_type.get(&event_type))
            .map_or(0, Vec::len)
    }

    /// Every source with at least one registration.
    pub fn sources(&self) -> Vec<Source> {
        self.routes.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{DispatchContext, HandlerError};
    use proptest::prelude::*;
    use reconcile_types::SourceId;

    fn noop() -> impl ControllerHandler {
        |_ctx: DispatchContext, _source_id: SourceId| async { Ok::<(), HandlerError>(()) }
    }

    fn source(raw: &str) -> Source {
        Source::try_new(raw).expect("valid source")
    }

    #[test]
    fn registrations_for_one_source_merge() {
        // Given: two controllers for the same source
        let registry = ControllerRegistry::new();
        registry.register(
            ControllerConfig::new(source("Dinosaurs"))
                .on(EventType::Create, noop())
                .on(EventType::Delete, noop()),
        );

        // When: a second one adds more handlers
        registry.register(
            ControllerConfig::new(source("Dinosaurs"))
                .on(EventType::Create, noop())
                .on(EventType::Update, noop()),
        );

        // Then: per-type lists were appended, not replaced
        let dinosaurs = source("Dinosaurs");
        assert_eq!(registry.handler_count(&dinosaurs, EventType::Create), 2);
        assert_eq!(registry.handler_count(&dinosaurs, EventType::Update), 1);
        assert_eq!(registry.handler_count(&dinosaurs, EventType::Delete), 1);
        assert_eq!(registry.sources(), vec![dinosaurs]);
    }

    #[test]
    fn unknown_routes_have_no_handlers() {
        let registry = ControllerRegistry::new();
        registry.register(ControllerConfig::new(source("Dinosaurs")).on(EventType::Create, noop()));

        assert!(registry
            .handlers_for(&source("Fossils"), EventType::Create)
            .is_empty());
        assert!(registry
            .handlers_for(&source("Dinosaurs"), EventType::Delete)
            .is_empty());
    }

    #[test]
    fn shared_handler_serves_several_event_types() {
        let shared: Arc<dyn ControllerHandler> = Arc::new(noop());
        let config = ControllerConfig::new(source("Dinosaurs"))
            .on_shared(EventType::Create, Arc::clone(&shared))
            .on_shared(EventType::Update, Arc::clone(&shared));
        let registry = ControllerRegistry::new();
        registry.register(config);

        let create = registry.handlers_for(&source("Dinosaurs"), EventType::Create);
        let update = registry.handlers_for(&source("Dinosaurs"), EventType::Update);
        assert!(Arc::ptr_eq(&create[0], &update[0]));
    }

    proptest! {
        #[test]
        fn merged_count_is_sum_of_registrations(counts in proptest::collection::vec(0usize..4, 1..6)) {
            let registry = ControllerRegistry::new();
            for count in &counts {
                let mut config = ControllerConfig::new(source("Dinosaurs"));
                for _ in 0..*count {
                    config = config.on(EventType::Create, noop());
                }
                registry.register(config);
            }
            prop_assert_eq!(
                registry.handler_count(&source("Dinosaurs"), EventType::Create),
                counts.iter().sum::<usize>()
            );
        }
    }
}
