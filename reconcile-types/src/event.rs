use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a persisted event.
///
/// Event ids are UUIDv7 values assigned when the event is first stored, so
/// they sort in creation order. The string form of an `EventId` is the
/// payload carried by every notification on the events channel.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    AsRef,
    Into,
    Display,
    Serialize,
    Deserialize
))]
pub struct EventId(Uuid);

impl EventId {
    /// Generate a fresh, time-ordered identifier.
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }

    /// Parse the textual form delivered in a notification payload.
    pub fn parse(raw: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(raw.trim()).map(Self::new)
    }
}

/// Logical resource-table name an event describes, e.g. `"Dinosaurs"`.
///
/// Controllers are registered per source, so the value is also the first
/// half of the routing key used by the dispatcher.
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
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct Source(String);

/// Identifier of the business record an event describes.
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
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct SourceId(String);

/// Kind of mutation that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// A record was created.
    Create,
    /// A record was replaced or patched.
    Update,
    /// A record was deleted.
    Delete,
}

impl EventType {
    /// Every event type, in declaration order.
    pub const ALL: [Self; 3] = [Self::Create, Self::Update, Self::Delete];

    /// Stored and logged form of the event type.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a stored event type is not one of `Create`, `Update`, `Delete`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event type `{0}`")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|event_type| event_type.as_str() == raw)
            .ok_or_else(|| UnknownEventType(raw.to_string()))
    }
}

/// Request to record a new event, issued by business services after a
/// mutation commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEvent {
    /// Resource kind that changed, e.g. "Dinosaurs"
    pub source: Source,
    /// Id of the changed record within its source
    pub source_id: SourceId,
    /// What happened to the record
    pub event_type: EventType,
}

impl NewEvent {
    /// Describe a change to `source_id`.
    pub const fn new(source: Source, source_id: SourceId, event_type: EventType) -> Self {
        Self {
            source,
            source_id,
            event_type,
        }
    }
}

/// A stored domain event: the unit of work handed to controllers.
///
/// `reconciled_at` stays `None` until every handler registered for
/// `(source, event_type)` has succeeded. Once set it is never cleared; event
/// stores preserve an existing stamp on `replace`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Store-assigned UUIDv7
    pub id: EventId,
    /// When the event was recorded
    pub created_at: DateTime<Utc>,
    /// When the row last changed
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker; deleted events are ignored
    pub deleted_at: Option<DateTime<Utc>>,
    /// Resource kind that changed, e.g. "Dinosaurs"
    pub source: Source,
    /// Id of the changed record within its source
    pub source_id: SourceId,
    /// What happened to the record
    pub event_type: EventType,
    /// Set once every handler succeeded; never cleared
    pub reconciled_at: Option<DateTime<Utc>>,
}

impl Event {
    /// Materialize a new event with a fresh id and creation timestamps.
    ///
    /// Timestamps are truncated to microseconds, the resolution of a Postgres
    /// `timestamptz`, so a stored event compares equal to the one returned by
    /// `create`.
    pub fn from_new(new_event: NewEvent) -> Self {
        let now = Utc::now().trunc_subsecs(6);
        Self {
            id: EventId::generate(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            source: new_event.source,
            source_id: new_event.source_id,
            event_type: new_event.event_type,
            reconciled_at: None,
        }
    }

    /// Whether `reconciled_at` is set.
    pub const fn is_reconciled(&self) -> bool {
        self.reconciled_at.is_some()
    }

    /// Stamp the event as reconciled at `at`.
    ///
    /// An event that is already reconciled keeps its original stamp.
    #[must_use]
    pub fn reconciled(mut self, at: DateTime<Utc>) -> Self {
        let at = at.trunc_subsecs(6);
        if self.reconciled_at.is_none() {
            self.reconciled_at = Some(at);
        }
        self.updated_at = at;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dinosaur_event(event_type: EventType) -> Event {
        Event::from_new(NewEvent::new(
            Source::try_new("Dinosaurs").expect("valid source"),
            SourceId::try_new("rex").expect("valid source id"),
            event_type,
        ))
    }

    #[test]
    fn event_type_round_trips_through_its_stored_form() {
        for event_type in EventType::ALL {
            assert_eq!(event_type.as_str().parse::<EventType>(), Ok(event_type));
        }
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        assert_eq!(
            "Upsert".parse::<EventType>(),
            Err(UnknownEventType("Upsert".to_string()))
        );
    }

    #[test]
    fn source_is_trimmed_and_must_not_be_empty() {
        let source = Source::try_new("  Dinosaurs ").expect("valid source");
        assert_eq!(source.as_ref(), "Dinosaurs");
        assert!(Source::try_new("   ").is_err());
    }

    #[test]
    fn event_id_parses_notification_payload() {
        let id = EventId::generate();
        assert_eq!(EventId::parse(&id.to_string()), Ok(id));
        assert!(EventId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn new_event_is_not_reconciled() {
        let event = dinosaur_event(EventType::Create);
        assert!(!event.is_reconciled());
        assert_eq!(event.deleted_at, None);
        assert_eq!(event.created_at, event.updated_at);
    }

    #[test]
    fn reconciled_stamp_is_never_overwritten() {
        // Given: an event reconciled once
        let first = Utc::now();
        let event = dinosaur_event(EventType::Update).reconciled(first);
        let stamp = event.reconciled_at;

        // When: it is stamped again later
        let event = event.reconciled(first + chrono::Duration::seconds(5));

        // Then: the original stamp survives
        assert_eq!(event.reconciled_at, stamp);
    }

    #[test]
    fn event_serializes_event_type_by_name() {
        let event = dinosaur_event(EventType::Delete);
        let json = serde_json::to_value(&event).expect("event serializes");
        assert_eq!(json["event_type"], "Delete");
        assert_eq!(json["source"], "Dinosaurs");
    }
}
