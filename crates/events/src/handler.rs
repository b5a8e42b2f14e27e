use async_trait::async_trait;

use crate::DomainEvent;

/// Failure reported by an event handler.
///
/// Handlers are application code with arbitrary failure modes; the
/// dispatcher only logs and counts them, so any error is accepted.
pub type HandlerError = anyhow::Error;

/// Reacts to one concrete event type.
///
/// Handlers are strongly typed: a handler for `ProfileUpdated` is never
/// invoked for any other event. Register handlers once at bootstrap via
/// [`crate::EventDispatcher::register`].
///
/// Delivery is at-least-once (a drain that fails to commit is retried), so
/// handlers should be idempotent.
#[async_trait]
pub trait EventHandler<E: DomainEvent>: Send + Sync + 'static {
    /// Name used in logs when this handler fails.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    async fn handle(&self, event: &E) -> Result<(), HandlerError>;
}
