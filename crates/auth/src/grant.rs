//! Permission grants: a flag set bound to a scope and a validity window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use campus_core::{
    AggregateId, AggregateRoot, DomainError, DomainResult, ExpectedVersion, GrantId, ResourceId,
    TenantId, UserId,
};
use campus_events::{EventBuffer, EventMetadata, EventSource};

use crate::grant_events::{GrantExpiryChanged, GrantIssued, GrantPermissionsChanged, GrantRevoked};
use crate::{PermissionFlags, PermissionType};

/// Lookup key for grants; a grant matches a key when all four parts are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GrantKey {
    pub subject_id: Option<UserId>,
    pub tenant_id: Option<TenantId>,
    pub resource_type: Option<String>,
    pub resource_id: Option<ResourceId>,
}

/// Shape of a grant's scope, derived from which key parts are present.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantScope {
    /// No subject, no tenant: platform-wide default.
    GlobalDefault,
    /// No subject, one tenant: tenant-wide default.
    TenantDefault,
    /// A subject's blanket permissions (no resource type).
    SubjectTenant,
    /// A subject's permissions on every resource of one type.
    SubjectContentType,
    /// A subject's permissions on a single resource instance.
    SubjectResource,
}

/// Persisted form of a grant (one row per grant).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRecord {
    pub id: GrantId,
    pub subject_id: Option<UserId>,
    pub tenant_id: Option<TenantId>,
    pub resource_type: Option<String>,
    pub resource_id: Option<ResourceId>,
    pub flags: PermissionFlags,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub version: u64,
}

/// Input for issuing a new grant, built with the `with_*`/`for_*` helpers.
///
/// ```ignore
/// let grant = NewGrant::subject(user, Some(tenant))
///     .for_type("Program")
///     .with(PermissionType::Read)
///     .issue(now)?;
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewGrant {
    pub subject_id: Option<UserId>,
    pub tenant_id: Option<TenantId>,
    pub resource_type: Option<String>,
    pub resource_id: Option<ResourceId>,
    pub flags: PermissionFlags,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewGrant {
    pub fn global_default() -> Self {
        Self::default()
    }

    pub fn tenant_default(tenant_id: TenantId) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            ..Self::default()
        }
    }

    pub fn subject(subject_id: UserId, tenant_id: Option<TenantId>) -> Self {
        Self {
            subject_id: Some(subject_id),
            tenant_id,
            ..Self::default()
        }
    }

    pub fn for_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    pub fn for_resource(mut self, resource_id: ResourceId) -> Self {
        self.resource_id = Some(resource_id);
        self
    }

    pub fn with(mut self, permission: PermissionType) -> Self {
        self.flags.set(permission);
        self
    }

    pub fn with_flags(mut self, flags: PermissionFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Validate and create the grant, raising `grant.issued`.
    pub fn issue(self, now: DateTime<Utc>) -> DomainResult<PermissionGrant> {
        if let Some(expires_at) = self.expires_at {
            if expires_at <= now {
                return Err(DomainError::validation("expires_at must be in the future"));
            }
        }

        let mut grant = PermissionGrant::from_record(GrantRecord {
            id: GrantId::new(),
            subject_id: self.subject_id,
            tenant_id: self.tenant_id,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            flags: self.flags,
            created_at: now,
            expires_at: self.expires_at,
            deleted_at: None,
            version: 0,
        })?;

        let meta = grant.event_meta(now);
        let (grant_id, scope, flags, expires_at) =
            (grant.id(), grant.scope(), grant.flags(), grant.expires_at());
        grant.raise(GrantIssued {
            meta,
            grant_id,
            scope,
            flags,
            expires_at,
        });
        Ok(grant)
    }
}

/// A permission grant aggregate.
///
/// Mutations take the caller's [`ExpectedVersion`], bump `version` on change
/// and raise an event. Grants are never hard-deleted; `soft_delete` marks
/// them revoked and they stay around for audit.
#[derive(Debug, Clone)]
pub struct PermissionGrant {
    record: GrantRecord,
    events: EventBuffer,
}

impl PermissionGrant {
    /// Rehydrate from storage. Only the scope shape is validated.
    pub fn from_record(record: GrantRecord) -> DomainResult<Self> {
        if record.resource_type.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(DomainError::validation("resource_type must not be empty"));
        }
        if record.resource_id.is_some() && record.resource_type.is_none() {
            return Err(DomainError::validation(
                "a resource-specific grant needs a resource_type",
            ));
        }
        if record.resource_id.is_some() && record.subject_id.is_none() {
            return Err(DomainError::validation(
                "a resource-specific grant needs a subject",
            ));
        }

        Ok(Self {
            record,
            events: EventBuffer::new(),
        })
    }

    pub fn record(&self) -> &GrantRecord {
        &self.record
    }

    pub fn into_record(self) -> GrantRecord {
        self.record
    }

    pub fn id(&self) -> GrantId {
        self.record.id
    }

    pub fn subject_id(&self) -> Option<UserId> {
        self.record.subject_id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.record.tenant_id
    }

    pub fn resource_type(&self) -> Option<&str> {
        self.record.resource_type.as_deref()
    }

    pub fn resource_id(&self) -> Option<ResourceId> {
        self.record.resource_id
    }

    pub fn flags(&self) -> PermissionFlags {
        self.record.flags
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.record.created_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.record.expires_at
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.record.deleted_at
    }

    pub fn key(&self) -> GrantKey {
        GrantKey {
            subject_id: self.record.subject_id,
            tenant_id: self.record.tenant_id,
            resource_type: self.record.resource_type.clone(),
            resource_id: self.record.resource_id,
        }
    }

    pub fn scope(&self) -> GrantScope {
        let r = &self.record;
        match (r.subject_id, r.tenant_id, &r.resource_type, r.resource_id) {
            (None, None, _, _) => GrantScope::GlobalDefault,
            (None, Some(_), _, _) => GrantScope::TenantDefault,
            (Some(_), _, _, Some(_)) => GrantScope::SubjectResource,
            (Some(_), _, Some(_), None) => GrantScope::SubjectContentType,
            (Some(_), _, None, None) => GrantScope::SubjectTenant,
        }
    }

    /// Not soft-deleted and not past its expiry.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.record.deleted_at.is_none() && self.record.expires_at.is_none_or(|e| e > now)
    }

    pub fn grants(&self, permission: PermissionType, now: DateTime<Utc>) -> bool {
        self.is_valid_at(now) && self.record.flags.test(permission)
    }

    pub fn add_permission(
        &mut self,
        permission: PermissionType,
        expected: ExpectedVersion,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.replace_flags(self.record.flags.with(permission), expected, now)
    }

    pub fn remove_permission(
        &mut self,
        permission: PermissionType,
        expected: ExpectedVersion,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.replace_flags(self.record.flags.without(permission), expected, now)
    }

    /// Replace the whole flag set. A no-op when nothing changes.
    pub fn replace_flags(
        &mut self,
        flags: PermissionFlags,
        expected: ExpectedVersion,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_mutable(expected)?;
        if flags == self.record.flags {
            return Ok(());
        }

        let added = flags.difference(self.record.flags);
        let removed = self.record.flags.difference(flags);
        self.record.flags = flags;
        self.record.version += 1;

        let meta = self.event_meta(now);
        self.raise(GrantPermissionsChanged {
            meta,
            grant_id: self.record.id,
            added,
            removed,
            flags,
        });
        Ok(())
    }

    /// Extend, shorten or clear the expiry. Use `soft_delete` to end a grant now.
    pub fn set_expiry(
        &mut self,
        expires_at: Option<DateTime<Utc>>,
        expected: ExpectedVersion,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.ensure_mutable(expected)?;
        if expires_at.is_some_and(|e| e <= now) {
            return Err(DomainError::validation("expires_at must be in the future"));
        }
        if expires_at == self.record.expires_at {
            return Ok(());
        }

        let previous = self.record.expires_at;
        self.record.expires_at = expires_at;
        self.record.version += 1;

        let meta = self.event_meta(now);
        self.raise(GrantExpiryChanged {
            meta,
            grant_id: self.record.id,
            previous,
            expires_at,
        });
        Ok(())
    }

    /// Revoke the grant. Idempotent: revoking twice changes nothing.
    pub fn soft_delete(
        &mut self,
        expected: ExpectedVersion,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        expected.check(self.record.version)?;
        if self.record.deleted_at.is_some() {
            return Ok(());
        }

        self.record.deleted_at = Some(now);
        self.record.version += 1;

        let meta = self.event_meta(now);
        self.raise(GrantRevoked {
            meta,
            grant_id: self.record.id,
            revoked_at: now,
        });
        Ok(())
    }

    fn ensure_mutable(&self, expected: ExpectedVersion) -> DomainResult<()> {
        expected.check(self.record.version)?;
        if self.record.deleted_at.is_some() {
            return Err(DomainError::invariant("grant has been revoked"));
        }
        Ok(())
    }

    fn event_meta(&self, now: DateTime<Utc>) -> EventMetadata {
        EventMetadata::new(self.aggregate_id(), Self::AGGREGATE_TYPE).with_occurred_at(now)
    }
}

impl AggregateRoot for PermissionGrant {
    const AGGREGATE_TYPE: &'static str = "permission_grant";

    fn aggregate_id(&self) -> AggregateId {
        self.record.id.into()
    }

    fn version(&self) -> u64 {
        self.record.version
    }
}

impl EventSource for PermissionGrant {
    fn event_buffer(&self) -> &EventBuffer {
        &self.events
    }

    fn event_buffer_mut(&mut self) -> &mut EventBuffer {
        &mut self.events
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn scope_shapes() {
        let (user, tenant, res) = (UserId::new(), TenantId::new(), ResourceId::new());
        let t = now();

        let cases = [
            (NewGrant::global_default(), GrantScope::GlobalDefault),
            (NewGrant::tenant_default(tenant).for_type("Program"), GrantScope::TenantDefault),
            (NewGrant::subject(user, Some(tenant)), GrantScope::SubjectTenant),
            (
                NewGrant::subject(user, Some(tenant)).for_type("Program"),
                GrantScope::SubjectContentType,
            ),
            (
                NewGrant::subject(user, None).for_type("Program").for_resource(res),
                GrantScope::SubjectResource,
            ),
        ];
        for (new, scope) in cases {
            assert_eq!(new.issue(t).unwrap().scope(), scope);
        }
    }

    #[test]
    fn resource_grants_need_type_and_subject() {
        let t = now();
        let no_type = NewGrant::subject(UserId::new(), None).for_resource(ResourceId::new());
        assert!(matches!(no_type.issue(t), Err(DomainError::Validation(_))));

        let no_subject = NewGrant::tenant_default(TenantId::new())
            .for_type("Program")
            .for_resource(ResourceId::new());
        assert!(matches!(no_subject.issue(t), Err(DomainError::Validation(_))));
    }

    #[test]
    fn issue_raises_one_event() {
        let mut grant = NewGrant::subject(UserId::new(), None)
            .with(PermissionType::Read)
            .issue(now())
            .unwrap();
        let events = grant.drain();
        assert_eq!(events.len(), 1);
        let issued = events[0].downcast_ref::<GrantIssued>().unwrap();
        assert_eq!(issued.grant_id, grant.id());
        assert_eq!(events[0].aggregate_type(), "permission_grant");
    }

    #[test]
    fn validity_window() {
        let t = now();
        let grant = NewGrant::subject(UserId::new(), None)
            .with(PermissionType::Read)
            .expiring_at(t + Duration::hours(1))
            .issue(t)
            .unwrap();

        assert!(grant.grants(PermissionType::Read, t));
        assert!(!grant.grants(PermissionType::Edit, t));
        assert!(!grant.grants(PermissionType::Read, t + Duration::hours(1)));
        assert!(!grant.grants(PermissionType::Read, t + Duration::days(2)));
    }

    #[test]
    fn soft_deleted_grant_grants_nothing_and_rejects_mutation() {
        let t = now();
        let mut grant = NewGrant::subject(UserId::new(), None)
            .with(PermissionType::Read)
            .issue(t)
            .unwrap();
        grant.soft_delete(ExpectedVersion::Exact(0), t).unwrap();

        assert!(!grant.grants(PermissionType::Read, t));
        assert_eq!(grant.version(), 1);
        let err = grant
            .add_permission(PermissionType::Edit, ExpectedVersion::Exact(1), t)
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        grant.soft_delete(ExpectedVersion::Any, t).unwrap();
        assert_eq!(grant.version(), 1);
    }

    #[test]
    fn flag_changes_bump_version_and_report_delta() {
        let t = now();
        let mut grant = NewGrant::subject(UserId::new(), None)
            .with(PermissionType::Read)
            .issue(t)
            .unwrap();
        grant.drain();

        grant
            .add_permission(PermissionType::Comment, ExpectedVersion::Exact(0), t)
            .unwrap();
        grant
            .add_permission(PermissionType::Comment, ExpectedVersion::Exact(1), t)
            .unwrap();
        grant
            .remove_permission(PermissionType::Read, ExpectedVersion::Exact(1), t)
            .unwrap();

        assert_eq!(grant.version(), 2);
        assert_eq!(grant.flags(), PermissionFlags::from(PermissionType::Comment));

        let events = grant.drain();
        assert_eq!(events.len(), 2);
        let removal = events[1].downcast_ref::<GrantPermissionsChanged>().unwrap();
        assert_eq!(removal.removed, PermissionFlags::from(PermissionType::Read));
        assert!(removal.added.is_empty());
    }

    #[test]
    fn stale_version_is_rejected() {
        let t = now();
        let mut grant = NewGrant::subject(UserId::new(), None).issue(t).unwrap();
        let err = grant
            .add_permission(PermissionType::Read, ExpectedVersion::Exact(7), t)
            .unwrap_err();
        assert_eq!(err, DomainError::VersionConflict { expected: 7, actual: 0 });
    }

    #[test]
    fn expiry_can_be_extended_and_cleared() {
        let t = now();
        let mut grant = NewGrant::subject(UserId::new(), None)
            .with(PermissionType::Read)
            .expiring_at(t + Duration::hours(1))
            .issue(t)
            .unwrap();

        grant
            .set_expiry(Some(t + Duration::days(30)), ExpectedVersion::Exact(0), t)
            .unwrap();
        assert!(grant.grants(PermissionType::Read, t + Duration::days(2)));

        grant.set_expiry(None, ExpectedVersion::Exact(1), t).unwrap();
        assert_eq!(grant.expires_at(), None);

        let err = grant
            .set_expiry(Some(t - Duration::seconds(1)), ExpectedVersion::Exact(2), t)
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }
}
