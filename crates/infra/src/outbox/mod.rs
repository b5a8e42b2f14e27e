//! Pending-event store (transactional outbox).
//!
//! In deferred mode the commit path moves an aggregate's drained events here
//! instead of dispatching them. The drain worker later reads them inside a
//! [`DrainTransaction`] and clears them only when that transaction commits, so
//! a batch is never visible to two drainers at once.

pub mod in_memory;

use async_trait::async_trait;
use thiserror::Error;

use campus_core::{AggregateId, AggregateRoot};
use campus_events::RaisedEvent;

pub use in_memory::InMemoryPendingEventStore;

/// Identifies one aggregate's event stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventSourceKey {
    pub aggregate_type: String,
    pub aggregate_id: AggregateId,
}

impl EventSourceKey {
    pub fn new(aggregate_type: impl Into<String>, aggregate_id: AggregateId) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            aggregate_id,
        }
    }

    pub fn of<A: AggregateRoot>(aggregate: &A) -> Self {
        Self::new(A::AGGREGATE_TYPE, aggregate.aggregate_id())
    }
}

impl core::fmt::Display for EventSourceKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.aggregate_type, self.aggregate_id)
    }
}

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("outbox backend error: {0}")]
    Backend(String),

    /// A key that was listed as pending had nothing to drain.
    #[error("no pending events for {0}")]
    NothingPending(EventSourceKey),
}

impl OutboxError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

#[async_trait]
pub trait PendingEventStore: Send + Sync {
    /// Append `events` to the source's pending batch, preserving raise order.
    async fn enqueue(
        &self,
        key: EventSourceKey,
        events: Vec<RaisedEvent>,
    ) -> Result<(), OutboxError>;

    /// Open a drain transaction. Implementations serialize transactions.
    async fn begin(&self) -> Result<Box<dyn DrainTransaction>, OutboxError>;
}

/// One unit of work over the pending-event store.
///
/// Dropping the transaction without calling [`commit`](Self::commit) rolls
/// back: drained batches stay pending.
#[async_trait]
pub trait DrainTransaction: Send {
    /// Sources with pending events, oldest first.
    async fn pending_sources(&mut self) -> Result<Vec<EventSourceKey>, OutboxError>;

    /// The source's pending events in raise order, marked for clearing.
    async fn drain(&mut self, key: &EventSourceKey) -> Result<Vec<RaisedEvent>, OutboxError>;

    /// Clear every batch drained so far.
    async fn commit(self: Box<Self>) -> Result<(), OutboxError>;
}
