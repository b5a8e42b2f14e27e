//! Domain event capture and in-process dispatch.
//!
//! - [`DomainEvent`]: immutable fact about an aggregate
//! - [`EventSource`]: aggregates buffer raised events until commit
//! - [`EventDispatcher`]: typed handler registry with per-event fan-out

pub mod dispatcher;
pub mod event;
pub mod handler;
pub mod source;

pub use dispatcher::{DispatchStats, EventDispatcher};
pub use event::{AsAny, DomainEvent, EventMetadata, RaisedEvent};
pub use handler::{EventHandler, HandlerError};
pub use source::{EventBuffer, EventSource};
