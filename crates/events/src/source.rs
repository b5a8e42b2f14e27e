//! Uncommitted-event buffers owned by aggregates.

use std::sync::Arc;

use campus_core::AggregateRoot;

use crate::event::{DomainEvent, RaisedEvent};

/// Ordered, append-only list of events raised since the last commit.
///
/// Insertion order is preserved; handlers may rely on it.
#[derive(Debug, Default, Clone)]
pub struct EventBuffer {
    events: Vec<RaisedEvent>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: RaisedEvent) {
        self.events.push(event);
    }

    /// Return every buffered event and leave the buffer empty.
    pub fn drain(&mut self) -> Vec<RaisedEvent> {
        std::mem::take(&mut self.events)
    }

    /// Events currently buffered, oldest first.
    pub fn pending(&self) -> &[RaisedEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Capability of an aggregate that accumulates domain events in memory
/// between persistence operations.
///
/// The aggregate owns its buffer exclusively. Mutation methods call
/// [`EventSource::raise`] as part of the same operation that changes state;
/// the commit path calls [`EventSource::drain`] once, after persistence succeeds.
pub trait EventSource: AggregateRoot {
    fn event_buffer(&self) -> &EventBuffer;

    fn event_buffer_mut(&mut self) -> &mut EventBuffer;

    fn raise<E: DomainEvent>(&mut self, event: E)
    where
        Self: Sized,
    {
        self.event_buffer_mut().push(Arc::new(event));
    }

    fn drain(&mut self) -> Vec<RaisedEvent> {
        self.event_buffer_mut().drain()
    }

    fn pending_events(&self) -> &[RaisedEvent] {
        self.event_buffer().pending()
    }

    fn has_pending_events(&self) -> bool {
        !self.event_buffer().is_empty()
    }
}
