//! Request pipeline: an ordered chain of behaviors around one handler.
//!
//! ```text
//! send(request)
//!   ↓
//! behavior[0] ── next ──▶ behavior[1] ── next ──▶ … ──▶ handler
//! ```
//!
//! Each behavior may short-circuit (return without calling `next`), or run
//! code before and after the rest of the chain.

pub mod behaviors;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use campus_auth::{AuthorizationCheckFailed, PermissionType};
use campus_core::DomainError;

pub use behaviors::{
    AuthorizationBehavior, LoggingBehavior, PerformanceBehavior, PermissionRequirement,
    RequiresPermission, Validate, ValidationBehavior,
};

/// A message handled by exactly one [`RequestHandler`].
pub trait Request: Send + Sync + 'static {
    type Response: Send + 'static;

    /// Name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

#[async_trait]
pub trait RequestHandler<R: Request>: Send + Sync {
    async fn handle(&self, request: &R) -> Result<R::Response, anyhow::Error>;
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("forbidden: requires [{}]", permission_list(.required))]
    Forbidden { required: Vec<PermissionType> },

    /// The permission check itself broke; not the same as a deny.
    #[error(transparent)]
    AuthorizationUnavailable(#[from] AuthorizationCheckFailed),

    #[error(transparent)]
    Validation(#[from] DomainError),

    #[error("handler failed: {0}")]
    Handler(#[source] anyhow::Error),
}

impl PipelineError {
    /// HTTP-class status for the API boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            PipelineError::Forbidden { .. } => 403,
            PipelineError::AuthorizationUnavailable(_) => 503,
            PipelineError::Validation(DomainError::NotFound) => 404,
            PipelineError::Validation(DomainError::VersionConflict { .. }) => 409,
            PipelineError::Validation(_) => 400,
            PipelineError::Handler(_) => 500,
        }
    }
}

fn permission_list(required: &[PermissionType]) -> String {
    required
        .iter()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// The remainder of the chain, handed to each behavior.
pub struct Next<'a, R: Request> {
    behaviors: &'a [Arc<dyn PipelineBehavior<R>>],
    handler: &'a dyn RequestHandler<R>,
}

impl<R: Request> Next<'_, R> {
    pub async fn run(self, request: &R) -> Result<R::Response, PipelineError> {
        match self.behaviors.split_first() {
            Some((behavior, rest)) => {
                let next = Next {
                    behaviors: rest,
                    handler: self.handler,
                };
                behavior.handle(request, next).await
            }
            None => self
                .handler
                .handle(request)
                .await
                .map_err(PipelineError::Handler),
        }
    }
}

#[async_trait]
pub trait PipelineBehavior<R: Request>: Send + Sync {
    async fn handle(&self, request: &R, next: Next<'_, R>) -> Result<R::Response, PipelineError>;
}

/// Behaviors run in registration order: the first one added is outermost.
pub struct RequestPipeline<R: Request> {
    behaviors: Vec<Arc<dyn PipelineBehavior<R>>>,
    handler: Arc<dyn RequestHandler<R>>,
}

impl<R: Request> RequestPipeline<R> {
    pub fn new(handler: impl RequestHandler<R> + 'static) -> Self {
        Self {
            behaviors: Vec::new(),
            handler: Arc::new(handler),
        }
    }

    pub fn with_behavior(mut self, behavior: impl PipelineBehavior<R> + 'static) -> Self {
        self.behaviors.push(Arc::new(behavior));
        self
    }

    pub async fn send(&self, request: &R) -> Result<R::Response, PipelineError> {
        Next {
            behaviors: &self.behaviors,
            handler: self.handler.as_ref(),
        }
        .run(request)
        .await
    }
}
