//! Three-tier permission cascade.
//!
//! For a subject `S` in tenant `Tn` asking for permission `P` on resource `R`
//! of type `T`, the resolver consults, in order, and stops at the first tier
//! whose valid grants contain `P`:
//!
//! 1. resource tier: `(S, Tn, T, R)` (skipped when there is no `R`)
//! 2. content-type tier: `(S, Tn, T, -)`
//! 3. tenant tier: `(S, Tn, -, -)`
//!
//! With [`DefaultGrantPolicy::InheritDefaults`] the tenant-wide default
//! `(-, Tn, T, -)` and the global default `(-, -, T, -)` follow.
//!
//! Faults: a resource-tier lookup fault falls through to the next tier under
//! [`ResourceTierFaultPolicy::FallThrough`]. Faults at any other tier are
//! returned as [`AuthorizationCheckFailed`]; a broken store never reads as a
//! plain deny.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, warn};

use campus_core::config::{ConfigError, env_flag};
use campus_core::{Clock, ResourceId, SystemClock, TenantId, UserId};

use crate::store::{GrantStore, GrantStoreError};
use crate::{GrantKey, PermissionFlags, PermissionType};

/// One step of the cascade.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Resource,
    ContentType,
    Tenant,
    TenantDefault,
    GlobalDefault,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Resource => "resource",
            Tier::ContentType => "content_type",
            Tier::Tenant => "tenant",
            Tier::TenantDefault => "tenant_default",
            Tier::GlobalDefault => "global_default",
        }
    }
}

impl core::fmt::Display for Tier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The grant store failed while the resolver needed an answer from it.
#[derive(Debug, Error)]
#[error("authorization check failed at {tier} tier: {source}")]
pub struct AuthorizationCheckFailed {
    pub tier: Tier,
    #[source]
    pub source: GrantStoreError,
}

/// Outcome of a single-permission check.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationDecision {
    pub permission: PermissionType,
    pub granted: bool,
    /// The tier that granted, `None` on deny.
    pub tier: Option<Tier>,
}

/// What to do when the resource-tier lookup faults.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum ResourceTierFaultPolicy {
    /// Log a warning and continue with the content-type tier.
    #[default]
    FallThrough,
    /// Fail the check like any other tier fault.
    Surface,
}

/// Whether subjectless default grants take part in the cascade.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum DefaultGrantPolicy {
    /// Only grants held by the subject count.
    #[default]
    SubjectOnly,
    /// Consult tenant-wide, then global defaults after the subject tiers.
    InheritDefaults,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ResolverConfig {
    pub resource_tier_faults: ResourceTierFaultPolicy,
    pub defaults: DefaultGrantPolicy,
}

impl ResolverConfig {
    pub const STRICT_RESOURCE_TIER_ENV: &'static str = "CAMPUS_AUTHZ_STRICT_RESOURCE_TIER";
    pub const INHERIT_DEFAULTS_ENV: &'static str = "CAMPUS_AUTHZ_INHERIT_DEFAULTS";

    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if env_flag(Self::STRICT_RESOURCE_TIER_ENV)? == Some(true) {
            config.resource_tier_faults = ResourceTierFaultPolicy::Surface;
        }
        if env_flag(Self::INHERIT_DEFAULTS_ENV)? == Some(true) {
            config.defaults = DefaultGrantPolicy::InheritDefaults;
        }
        Ok(config)
    }

    pub fn with_resource_tier_faults(mut self, policy: ResourceTierFaultPolicy) -> Self {
        self.resource_tier_faults = policy;
        self
    }

    pub fn with_defaults(mut self, policy: DefaultGrantPolicy) -> Self {
        self.defaults = policy;
        self
    }
}

/// The coordinates of one authorization question, minus the permission.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target<'a> {
    subject_id: UserId,
    tenant_id: Option<TenantId>,
    resource_type: &'a str,
    resource_id: Option<ResourceId>,
}

impl Target<'_> {
    fn key(&self, tier: Tier) -> GrantKey {
        let resource_type = Some(self.resource_type.to_string());
        match tier {
            Tier::Resource => GrantKey {
                subject_id: Some(self.subject_id),
                tenant_id: self.tenant_id,
                resource_type,
                resource_id: self.resource_id,
            },
            Tier::ContentType => GrantKey {
                subject_id: Some(self.subject_id),
                tenant_id: self.tenant_id,
                resource_type,
                resource_id: None,
            },
            Tier::Tenant => GrantKey {
                subject_id: Some(self.subject_id),
                tenant_id: self.tenant_id,
                resource_type: None,
                resource_id: None,
            },
            Tier::TenantDefault => GrantKey {
                subject_id: None,
                tenant_id: self.tenant_id,
                resource_type,
                resource_id: None,
            },
            Tier::GlobalDefault => GrantKey {
                subject_id: None,
                tenant_id: None,
                resource_type,
                resource_id: None,
            },
        }
    }
}

/// Flags granted per tier, filled lazily during one call.
type TierMemo = HashMap<Tier, PermissionFlags>;

/// Answers "may this subject do P here?" against a [`GrantStore`].
///
/// Read-only and cheap to share: wrap it in an `Arc` and call it from any
/// number of tasks.
#[derive(Debug)]
pub struct PermissionResolver<S> {
    store: S,
    clock: Arc<dyn Clock>,
    config: ResolverConfig,
}

impl<S: GrantStore> PermissionResolver<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            config: ResolverConfig::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> ResolverConfig {
        self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn authorize(
        &self,
        subject_id: UserId,
        tenant_id: Option<TenantId>,
        resource_type: &str,
        resource_id: Option<ResourceId>,
        permission: PermissionType,
    ) -> Result<bool, AuthorizationCheckFailed> {
        let decision = self
            .resolve(subject_id, tenant_id, resource_type, resource_id, permission)
            .await?;
        Ok(decision.granted)
    }

    /// Like [`authorize`](Self::authorize), but also reports the granting tier.
    pub async fn resolve(
        &self,
        subject_id: UserId,
        tenant_id: Option<TenantId>,
        resource_type: &str,
        resource_id: Option<ResourceId>,
        permission: PermissionType,
    ) -> Result<AuthorizationDecision, AuthorizationCheckFailed> {
        let target = Target {
            subject_id,
            tenant_id,
            resource_type,
            resource_id,
        };
        let now = self.clock.now();
        let mut memo = TierMemo::new();
        self.cascade(&target, permission, now, &mut memo).await
    }

    /// `true` when every permission is granted, each by its own cascade.
    ///
    /// Permissions may be satisfied by different tiers: `Read` from a
    /// content-type grant and `Comment` from a tenant grant together pass.
    /// An empty set passes.
    pub async fn authorize_all(
        &self,
        subject_id: UserId,
        tenant_id: Option<TenantId>,
        resource_type: &str,
        resource_id: Option<ResourceId>,
        permissions: impl IntoIterator<Item = PermissionType>,
    ) -> Result<bool, AuthorizationCheckFailed> {
        let target = Target {
            subject_id,
            tenant_id,
            resource_type,
            resource_id,
        };
        let now = self.clock.now();
        let mut memo = TierMemo::new();
        for permission in permissions {
            if !self.cascade(&target, permission, now, &mut memo).await?.granted {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// `true` when at least one permission is granted. An empty set fails.
    pub async fn authorize_any(
        &self,
        subject_id: UserId,
        tenant_id: Option<TenantId>,
        resource_type: &str,
        resource_id: Option<ResourceId>,
        permissions: impl IntoIterator<Item = PermissionType>,
    ) -> Result<bool, AuthorizationCheckFailed> {
        let target = Target {
            subject_id,
            tenant_id,
            resource_type,
            resource_id,
        };
        let now = self.clock.now();
        let mut memo = TierMemo::new();
        for permission in permissions {
            if self.cascade(&target, permission, now, &mut memo).await?.granted {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn tiers(&self, target: &Target<'_>) -> Vec<Tier> {
        let mut tiers = Vec::with_capacity(5);
        if target.resource_id.is_some() {
            tiers.push(Tier::Resource);
        }
        tiers.extend([Tier::ContentType, Tier::Tenant]);
        if self.config.defaults == DefaultGrantPolicy::InheritDefaults {
            if target.tenant_id.is_some() {
                tiers.push(Tier::TenantDefault);
            }
            tiers.push(Tier::GlobalDefault);
        }
        tiers
    }

    async fn cascade(
        &self,
        target: &Target<'_>,
        permission: PermissionType,
        now: DateTime<Utc>,
        memo: &mut TierMemo,
    ) -> Result<AuthorizationDecision, AuthorizationCheckFailed> {
        for tier in self.tiers(target) {
            let granted = self.tier_flags(target, tier, now, memo).await?;
            if granted.test(permission) {
                debug!(
                    subject_id = %target.subject_id,
                    resource_type = target.resource_type,
                    permission = %permission,
                    tier = %tier,
                    "permission granted"
                );
                return Ok(AuthorizationDecision {
                    permission,
                    granted: true,
                    tier: Some(tier),
                });
            }
        }

        debug!(
            subject_id = %target.subject_id,
            resource_type = target.resource_type,
            permission = %permission,
            "permission denied"
        );
        Ok(AuthorizationDecision {
            permission,
            granted: false,
            tier: None,
        })
    }

    /// Union of the valid grants' flags at `tier`, querying the store at most
    /// once per tier per call.
    async fn tier_flags(
        &self,
        target: &Target<'_>,
        tier: Tier,
        now: DateTime<Utc>,
        memo: &mut TierMemo,
    ) -> Result<PermissionFlags, AuthorizationCheckFailed> {
        if let Some(flags) = memo.get(&tier) {
            return Ok(*flags);
        }

        let flags = match self.store.find_grants(&target.key(tier)).await {
            Ok(grants) => grants
                .iter()
                .filter(|g| g.is_valid_at(now))
                .fold(PermissionFlags::empty(), |acc, g| acc | g.flags()),
            Err(source)
                if tier == Tier::Resource
                    && self.config.resource_tier_faults == ResourceTierFaultPolicy::FallThrough =>
            {
                warn!(
                    tier = %tier,
                    resource_type = target.resource_type,
                    error = %source,
                    "resource tier lookup failed; falling through"
                );
                PermissionFlags::empty()
            }
            Err(source) => {
                error!(
                    tier = %tier,
                    resource_type = target.resource_type,
                    error = %source,
                    "grant lookup failed"
                );
                return Err(AuthorizationCheckFailed { tier, source });
            }
        };

        memo.insert(tier, flags);
        Ok(flags)
    }
}
