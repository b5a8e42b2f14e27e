//! Events raised by [`crate::PermissionGrant`] mutations.
//!
//! Consumers typically feed these into an audit log or invalidate cached
//! authorization results.

use chrono::{DateTime, Utc};

use campus_core::GrantId;
use campus_events::{DomainEvent, EventMetadata};

use crate::{GrantScope, PermissionFlags};

#[derive(Debug, Clone)]
pub struct GrantIssued {
    pub meta: EventMetadata,
    pub grant_id: GrantId,
    pub scope: GrantScope,
    pub flags: PermissionFlags,
    pub expires_at: Option<DateTime<Utc>>,
}

impl DomainEvent for GrantIssued {
    fn event_type(&self) -> &'static str {
        "grant.issued"
    }

    fn metadata(&self) -> &EventMetadata {
        &self.meta
    }
}

#[derive(Debug, Clone)]
pub struct GrantPermissionsChanged {
    pub meta: EventMetadata,
    pub grant_id: GrantId,
    pub added: PermissionFlags,
    pub removed: PermissionFlags,
    /// Flags after the change.
    pub flags: PermissionFlags,
}

impl DomainEvent for GrantPermissionsChanged {
    fn event_type(&self) -> &'static str {
        "grant.permissions_changed"
    }

    fn metadata(&self) -> &EventMetadata {
        &self.meta
    }
}

#[derive(Debug, Clone)]
pub struct GrantExpiryChanged {
    pub meta: EventMetadata,
    pub grant_id: GrantId,
    pub previous: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl DomainEvent for GrantExpiryChanged {
    fn event_type(&self) -> &'static str {
        "grant.expiry_changed"
    }

    fn metadata(&self) -> &EventMetadata {
        &self.meta
    }
}

#[derive(Debug, Clone)]
pub struct GrantRevoked {
    pub meta: EventMetadata,
    pub grant_id: GrantId,
    pub revoked_at: DateTime<Utc>,
}

impl DomainEvent for GrantRevoked {
    fn event_type(&self) -> &'static str {
        "grant.revoked"
    }

    fn metadata(&self) -> &EventMetadata {
        &self.meta
    }
}
