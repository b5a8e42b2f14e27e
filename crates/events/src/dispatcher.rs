//! In-process domain event dispatch.
//!
//! Handlers are kept in a registry keyed by the concrete event type. Each
//! registration is turned into a type-erased invoker once, at bootstrap, so
//! dispatch is a map lookup plus a downcast.
//!
//! Ordering:
//! - events are dispatched strictly one after another, in the given order
//! - all handlers of one event run concurrently (spawned tasks) and are joined
//!   before the next event starts
//! - dropping a `dispatch` future aborts the handlers it is still waiting on
//!
//! Failure isolation: a handler error (or panic) is logged and counted, and
//! never reaches the caller of `dispatch`. Siblings and later events still run.

use std::any::{TypeId, type_name};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::anyhow;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::event::{DomainEvent, RaisedEvent};
use crate::handler::{EventHandler, HandlerError};

type HandlerFuture = BoxFuture<'static, Result<(), HandlerError>>;
type ErasedInvoke = Arc<dyn Fn(RaisedEvent) -> HandlerFuture + Send + Sync>;

#[derive(Clone)]
struct RegisteredHandler {
    name: &'static str,
    invoke: ErasedInvoke,
}

impl core::fmt::Debug for RegisteredHandler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RegisteredHandler").field("name", &self.name).finish()
    }
}

/// Snapshot of dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub events_dispatched: u64,
    pub handler_invocations: u64,
    pub handler_failures: u64,
}

#[derive(Debug, Default)]
struct DispatchCounters {
    events_dispatched: AtomicU64,
    handler_invocations: AtomicU64,
    handler_failures: AtomicU64,
}

/// Registry of typed event handlers plus the fan-out dispatch loop.
///
/// Populate with [`register`](Self::register) during startup, then share
/// behind an `Arc`; dispatch only needs `&self`.
#[derive(Debug, Default)]
pub struct EventDispatcher {
    handlers: HashMap<TypeId, Vec<RegisteredHandler>>,
    counters: DispatchCounters,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events of concrete type `E`.
    pub fn register<E, H>(&mut self, handler: H) -> &mut Self
    where
        E: DomainEvent,
        H: EventHandler<E>,
    {
        let handler = Arc::new(handler);
        let name = handler.name();

        let invoke: ErasedInvoke = Arc::new(move |event: RaisedEvent| -> HandlerFuture {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let Some(typed) = event.downcast_ref::<E>() else {
                    return Err(anyhow!(
                        "handler for {} received '{}'",
                        type_name::<E>(),
                        event.event_type()
                    ));
                };
                handler.handle(typed).await
            })
        });

        self.handlers
            .entry(TypeId::of::<E>())
            .or_default()
            .push(RegisteredHandler { name, invoke });
        self
    }

    /// Number of handlers registered for `E`.
    pub fn handler_count<E: DomainEvent>(&self) -> usize {
        self.handlers.get(&TypeId::of::<E>()).map_or(0, Vec::len)
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            events_dispatched: self.counters.events_dispatched.load(Ordering::Relaxed),
            handler_invocations: self.counters.handler_invocations.load(Ordering::Relaxed),
            handler_failures: self.counters.handler_failures.load(Ordering::Relaxed),
        }
    }

    /// Dispatch events in order. Returns once every handler of every event
    /// has completed or failed.
    pub async fn dispatch<I>(&self, events: I)
    where
        I: IntoIterator<Item = RaisedEvent>,
    {
        for event in events {
            self.dispatch_one(event).await;
        }
    }

    /// Fan one event out to all of its handlers and wait for them.
    pub async fn dispatch_one(&self, event: RaisedEvent) {
        self.counters.events_dispatched.fetch_add(1, Ordering::Relaxed);

        let Some(handlers) = self.handlers.get(&event.concrete_type_id()) else {
            debug!(
                event_type = event.event_type(),
                event_id = %event.event_id(),
                "no handlers registered"
            );
            return;
        };

        // Dropping `tasks` aborts every handler still running.
        let mut tasks = JoinSet::new();
        for handler in handlers {
            let name = handler.name;
            let invocation = AssertUnwindSafe((handler.invoke)(Arc::clone(&event))).catch_unwind();
            tasks.spawn(async move { (name, invocation.await) });
        }

        self.counters
            .handler_invocations
            .fetch_add(handlers.len() as u64, Ordering::Relaxed);

        while let Some(joined) = tasks.join_next().await {
            let (name, error) = match joined {
                Ok((_, Ok(Ok(())))) => continue,
                Ok((name, Ok(Err(err)))) => (name, format!("{err:#}")),
                Ok((name, Err(_panic))) => (name, "handler panicked".to_string()),
                Err(join_err) => ("unknown", join_err.to_string()),
            };

            self.counters.handler_failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                event_type = event.event_type(),
                event_id = %event.event_id(),
                aggregate_type = event.aggregate_type(),
                handler = name,
                error = %error,
                "event handler failed"
            );
        }
    }
}

impl dyn DomainEvent {
    /// `TypeId` of the concrete event behind the trait object.
    pub fn concrete_type_id(&self) -> TypeId {
        self.as_any().type_id()
    }
}
