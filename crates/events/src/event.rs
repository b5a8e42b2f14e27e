use std::any::Any;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use campus_core::AggregateId;

/// Identity and provenance shared by every domain event.
///
/// Constructed once when the event is raised; events are facts and never
/// change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    event_id: Uuid,
    occurred_at: DateTime<Utc>,
    aggregate_id: AggregateId,
    aggregate_type: String,
}

impl EventMetadata {
    /// Fresh metadata: a UUIDv7 event id and the current time.
    pub fn new(aggregate_id: AggregateId, aggregate_type: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            occurred_at: Utc::now(),
            aggregate_id,
            aggregate_type: aggregate_type.into(),
        }
    }

    /// Override business time (replays, deterministic tests).
    pub fn with_occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }
}

/// Access to the concrete type behind a `dyn DomainEvent`.
///
/// Blanket-implemented; event types never implement this by hand.
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// "Something happened to aggregate X."
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (`schema_version` is bumped on a breaking payload change)
/// - **object safe**, so one aggregate buffer can hold events of many types
pub trait DomainEvent: AsAny + core::fmt::Debug {
    /// Stable event name (e.g. "profile.updated").
    fn event_type(&self) -> &'static str;

    /// Payload schema version; starts at 1.
    fn schema_version(&self) -> u32 {
        1
    }

    fn metadata(&self) -> &EventMetadata;

    fn event_id(&self) -> Uuid {
        self.metadata().event_id()
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.metadata().occurred_at()
    }

    fn aggregate_id(&self) -> AggregateId {
        self.metadata().aggregate_id()
    }

    fn aggregate_type(&self) -> &str {
        self.metadata().aggregate_type()
    }
}

/// A raised event, shared between the buffer, the outbox and handlers.
pub type RaisedEvent = Arc<dyn DomainEvent>;

impl dyn DomainEvent {
    /// Borrow the concrete event if it is an `E`.
    pub fn downcast_ref<E: DomainEvent>(&self) -> Option<&E> {
        self.as_any().downcast_ref::<E>()
    }

    pub fn is<E: DomainEvent>(&self) -> bool {
        self.as_any().is::<E>()
    }
}
