//! `campus-auth`: discretionary access control.
//!
//! Permissions are bits in a [`PermissionFlags`] set. [`PermissionGrant`]s bind
//! a flag set to a scope (subject, tenant, resource type, resource) and the
//! [`PermissionResolver`] walks the scopes from most to least specific.
//!
//! This crate is decoupled from HTTP and storage; grant persistence sits behind
//! the [`GrantStore`] and [`GrantRepository`] traits.

pub mod flags;
pub mod grant;
pub mod grant_events;
pub mod permission_type;
pub mod resolver;
pub mod store;

pub use flags::PermissionFlags;
pub use grant::{GrantKey, GrantRecord, GrantScope, NewGrant, PermissionGrant};
pub use grant_events::{GrantExpiryChanged, GrantIssued, GrantPermissionsChanged, GrantRevoked};
pub use permission_type::{PermissionType, UnknownPermission};
pub use resolver::{
    AuthorizationCheckFailed, AuthorizationDecision, DefaultGrantPolicy, PermissionResolver,
    ResolverConfig, ResourceTierFaultPolicy, Tier,
};
pub use store::{GrantRepository, GrantStore, GrantStoreError};
