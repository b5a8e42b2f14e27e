//! Unit-of-work commit path for event-sourcing aggregates.
//!
//! ```text
//! mutate aggregate (events buffered)
//!   ↓
//! 1. persist aggregate state        -- failure: buffer untouched, nothing dispatched
//!   ↓
//! 2. drain the aggregate's buffer (exactly once)
//!   ↓
//! 3a. Inline:   dispatch now
//! 3b. Deferred: enqueue in the pending-event store for the drain worker
//! ```

use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;
use tracing::{debug, warn};

use campus_events::{EventDispatcher, EventSource};

use crate::outbox::{EventSourceKey, OutboxError, PendingEventStore};

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// Dispatch in the committing task, right after persistence.
    #[default]
    Inline,
    /// Hand events to the pending-event store; the drain worker dispatches them.
    Deferred,
}

#[derive(Debug, Error)]
pub enum CommitError {
    /// Persisting the aggregate failed; its events are still buffered.
    #[error("persisting aggregate failed: {0}")]
    Persist(#[source] anyhow::Error),

    /// Persisted, but the events could not be queued; they were put back in the
    /// aggregate's buffer.
    #[error(transparent)]
    Outbox(#[from] OutboxError),
}

/// Persists an aggregate and then hands its buffered events on.
#[derive(Clone)]
pub struct EventCommitter {
    dispatcher: Arc<EventDispatcher>,
    pending: Arc<dyn PendingEventStore>,
    mode: DispatchMode,
}

impl core::fmt::Debug for EventCommitter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventCommitter").field("mode", &self.mode).finish()
    }
}

impl EventCommitter {
    pub fn new(
        dispatcher: Arc<EventDispatcher>,
        pending: Arc<dyn PendingEventStore>,
        mode: DispatchMode,
    ) -> Self {
        Self {
            dispatcher,
            pending,
            mode,
        }
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Run `persist`, then drain `aggregate` and dispatch or enqueue its events.
    ///
    /// Returns the number of events handed on.
    ///
    /// ```ignore
    /// let repo = Arc::clone(&repo);
    /// committer
    ///     .commit(&mut grant, move |g| {
    ///         Box::pin(async move { repo.save(g, ExpectedVersion::Exact(0)).await })
    ///     })
    ///     .await?;
    /// ```
    pub async fn commit<A, E, F>(&self, aggregate: &mut A, persist: F) -> Result<usize, CommitError>
    where
        A: EventSource + Send,
        F: for<'a> FnOnce(&'a A) -> BoxFuture<'a, Result<(), E>>,
        E: Into<anyhow::Error>,
    {
        persist(&*aggregate)
            .await
            .map_err(|e| CommitError::Persist(e.into()))?;

        let events = aggregate.drain();
        let count = events.len();
        if count == 0 {
            return Ok(0);
        }

        let key = EventSourceKey::of(&*aggregate);
        match self.mode {
            DispatchMode::Inline => {
                debug!(source = %key, events = count, "dispatching committed events");
                self.dispatcher.dispatch(events).await;
            }
            DispatchMode::Deferred => {
                if let Err(err) = self.pending.enqueue(key.clone(), events.clone()).await {
                    warn!(source = %key, error = %err, "failed to queue committed events");
                    let buffer = aggregate.event_buffer_mut();
                    for event in events {
                        buffer.push(event);
                    }
                    return Err(err.into());
                }
                debug!(source = %key, events = count, "queued committed events");
            }
        }
        Ok(count)
    }
}
