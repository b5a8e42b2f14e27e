//! Built-in pipeline behaviors.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use campus_auth::{GrantStore, PermissionResolver, PermissionType};
use campus_core::{DomainError, ResourceId, TenantId, UserId};

use super::{Next, PipelineBehavior, PipelineError, Request};

/// Logs entry, exit and failures of every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingBehavior;

#[async_trait]
impl<R: Request> PipelineBehavior<R> for LoggingBehavior {
    async fn handle(&self, request: &R, next: Next<'_, R>) -> Result<R::Response, PipelineError> {
        let name = request.name();
        debug!(request = name, "handling request");

        let result = next.run(request).await;
        match &result {
            Ok(_) => info!(request = name, "request handled"),
            Err(err) => warn!(
                request = name,
                status = err.status_code(),
                error = %err,
                "request failed"
            ),
        }
        result
    }
}

/// Input checks run before authorization and the handler.
pub trait Validate {
    fn validate(&self) -> Result<(), DomainError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ValidationBehavior;

#[async_trait]
impl<R: Request + Validate> PipelineBehavior<R> for ValidationBehavior {
    async fn handle(&self, request: &R, next: Next<'_, R>) -> Result<R::Response, PipelineError> {
        request.validate()?;
        next.run(request).await
    }
}

/// Everything the resolver needs to check a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRequirement {
    pub subject_id: UserId,
    pub tenant_id: Option<TenantId>,
    pub resource_type: String,
    pub resource_id: Option<ResourceId>,
    /// All of these must be granted.
    pub permissions: Vec<PermissionType>,
}

pub trait RequiresPermission {
    fn requirement(&self) -> PermissionRequirement;
}

/// Rejects requests whose subject lacks any required permission.
///
/// A deny becomes `Forbidden` (403); a broken grant store becomes
/// `AuthorizationUnavailable` (503).
pub struct AuthorizationBehavior<S> {
    resolver: Arc<PermissionResolver<S>>,
}

impl<S> AuthorizationBehavior<S> {
    pub fn new(resolver: Arc<PermissionResolver<S>>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl<R, S> PipelineBehavior<R> for AuthorizationBehavior<S>
where
    R: Request + RequiresPermission,
    S: GrantStore + 'static,
{
    async fn handle(&self, request: &R, next: Next<'_, R>) -> Result<R::Response, PipelineError> {
        let requirement = request.requirement();
        let granted = self
            .resolver
            .authorize_all(
                requirement.subject_id,
                requirement.tenant_id,
                &requirement.resource_type,
                requirement.resource_id,
                requirement.permissions.iter().copied(),
            )
            .await?;

        if !granted {
            return Err(PipelineError::Forbidden {
                required: requirement.permissions,
            });
        }
        next.run(request).await
    }
}

/// Warns about requests slower than `threshold`.
#[derive(Debug, Clone, Copy)]
pub struct PerformanceBehavior {
    threshold: Duration,
}

impl PerformanceBehavior {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }
}

impl Default for PerformanceBehavior {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

#[async_trait]
impl<R: Request> PipelineBehavior<R> for PerformanceBehavior {
    async fn handle(&self, request: &R, next: Next<'_, R>) -> Result<R::Response, PipelineError> {
        let started = Instant::now();
        let result = next.run(request).await;
        let elapsed = started.elapsed();
        if elapsed > self.threshold {
            warn!(
                request = request.name(),
                elapsed_ms = elapsed.as_millis() as u64,
                threshold_ms = self.threshold.as_millis() as u64,
                "slow request"
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Utc;

    use campus_auth::{GrantKey, NewGrant};

    use super::super::{RequestHandler, RequestPipeline};
    use super::*;
    use crate::grant_store::InMemoryGrantStore;

    #[derive(Debug)]
    struct RenameProgram {
        actor: UserId,
        tenant: TenantId,
        program: ResourceId,
        title: String,
    }

    impl Request for RenameProgram {
        type Response = String;
    }

    impl Validate for RenameProgram {
        fn validate(&self) -> Result<(), DomainError> {
            if self.title.trim().is_empty() {
                return Err(DomainError::validation("title cannot be empty"));
            }
            Ok(())
        }
    }

    impl RequiresPermission for RenameProgram {
        fn requirement(&self) -> PermissionRequirement {
            PermissionRequirement {
                subject_id: self.actor,
                tenant_id: Some(self.tenant),
                resource_type: "Program".into(),
                resource_id: Some(self.program),
                permissions: vec![PermissionType::Read, PermissionType::Edit],
            }
        }
    }

    struct RenameHandler;

    #[async_trait]
    impl RequestHandler<RenameProgram> for RenameHandler {
        async fn handle(&self, request: &RenameProgram) -> Result<String, anyhow::Error> {
            if request.title == "explode" {
                anyhow::bail!("storage unavailable");
            }
            Ok(request.title.to_uppercase())
        }
    }

    /// Records entry/exit to check chain order.
    struct Trace(&'static str, Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl<R: Request> PipelineBehavior<R> for Trace {
        async fn handle(
            &self,
            request: &R,
            next: Next<'_, R>,
        ) -> Result<R::Response, PipelineError> {
            self.1.lock().unwrap().push(format!("{}:before", self.0));
            let result = next.run(request).await;
            self.1.lock().unwrap().push(format!("{}:after", self.0));
            result
        }
    }

    struct Fixture {
        store: Arc<InMemoryGrantStore>,
        request: RenameProgram,
    }

    impl Fixture {
        fn new(granted: &[PermissionType]) -> Self {
            let request = RenameProgram {
                actor: UserId::new(),
                tenant: TenantId::new(),
                program: ResourceId::new(),
                title: "Chemistry 101".into(),
            };
            let store = Arc::new(InMemoryGrantStore::new());
            let grant = NewGrant::subject(request.actor, Some(request.tenant))
                .for_type("Program")
                .with_flags(granted.iter().collect())
                .issue(Utc::now())
                .unwrap();
            store.seed(&grant).unwrap();
            Self { store, request }
        }

        fn pipeline(&self) -> RequestPipeline<RenameProgram> {
            let resolver = Arc::new(PermissionResolver::new(self.store.clone()));
            RequestPipeline::new(RenameHandler)
                .with_behavior(LoggingBehavior)
                .with_behavior(ValidationBehavior)
                .with_behavior(AuthorizationBehavior::new(resolver))
                .with_behavior(PerformanceBehavior::default())
        }
    }

    #[tokio::test]
    async fn authorized_request_reaches_the_handler() {
        let fx = Fixture::new(&[PermissionType::Read, PermissionType::Edit]);
        let response = fx.pipeline().send(&fx.request).await.unwrap();
        assert_eq!(response, "CHEMISTRY 101");
    }

    #[tokio::test]
    async fn missing_permission_is_forbidden() {
        let fx = Fixture::new(&[PermissionType::Read]);
        let err = fx.pipeline().send(&fx.request).await.unwrap_err();
        assert_eq!(err.status_code(), 403);
    }

    #[tokio::test]
    async fn broken_grant_store_is_unavailable_not_forbidden() {
        let fx = Fixture::new(&[PermissionType::Read, PermissionType::Edit]);
        fx.store
            .fail_lookups_where(|k: &GrantKey| k.subject_id.is_some() && k.resource_id.is_none());
        let err = fx.pipeline().send(&fx.request).await.unwrap_err();
        assert!(matches!(err, PipelineError::AuthorizationUnavailable(_)));
        assert_eq!(err.status_code(), 503);
    }

    #[tokio::test]
    async fn invalid_request_stops_before_authorization() {
        let mut fx = Fixture::new(&[]);
        fx.request.title = "  ".into();
        fx.store.fail_lookups_where(|_| true);
        let err = fx.pipeline().send(&fx.request).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn handler_failure_is_a_500() {
        let mut fx = Fixture::new(&[PermissionType::Read, PermissionType::Edit]);
        fx.request.title = "explode".into();
        let err = fx.pipeline().send(&fx.request).await.unwrap_err();
        assert!(matches!(err, PipelineError::Handler(_)));
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn behaviors_nest_in_registration_order() {
        let fx = Fixture::new(&[]);
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = RequestPipeline::new(RenameHandler)
            .with_behavior(Trace("outer", log.clone()))
            .with_behavior(Trace("inner", log.clone()));

        pipeline.send(&fx.request).await.unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["outer:before", "inner:before", "inner:after", "outer:after"]
        );
    }
}
