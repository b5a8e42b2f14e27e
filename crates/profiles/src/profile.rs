use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use campus_core::{AggregateId, AggregateRoot, DomainError, DomainResult, TenantId, UserId};
use campus_events::{DomainEvent, EventBuffer, EventMetadata, EventSource};

const MAX_DISPLAY_NAME_LEN: usize = 100;
const MAX_BIO_LEN: usize = 2_000;

/// Aggregate root: UserProfile.
#[derive(Debug, Clone)]
pub struct UserProfile {
    id: AggregateId,
    user_id: UserId,
    tenant_id: TenantId,
    display_name: String,
    bio: Option<String>,
    version: u64,
    events: EventBuffer,
}

/// Persisted profile state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    pub id: AggregateId,
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub display_name: String,
    pub bio: Option<String>,
    pub version: u64,
}

/// Event: ProfileCreated.
#[derive(Debug, Clone)]
pub struct ProfileCreated {
    pub meta: EventMetadata,
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub display_name: String,
}

impl DomainEvent for ProfileCreated {
    fn event_type(&self) -> &'static str {
        "profile.created"
    }

    fn metadata(&self) -> &EventMetadata {
        &self.meta
    }
}

/// Event: ProfileUpdated. Carries the profile's visible fields after the change.
#[derive(Debug, Clone)]
pub struct ProfileUpdated {
    pub meta: EventMetadata,
    pub user_id: UserId,
    pub display_name: String,
    pub previous_display_name: String,
    pub bio: Option<String>,
}

impl DomainEvent for ProfileUpdated {
    fn event_type(&self) -> &'static str {
        "profile.updated"
    }

    fn metadata(&self) -> &EventMetadata {
        &self.meta
    }
}

fn validate_display_name(name: &str) -> DomainResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::validation("display name cannot be empty"));
    }
    if name.chars().count() > MAX_DISPLAY_NAME_LEN {
        return Err(DomainError::validation(format!(
            "display name cannot exceed {MAX_DISPLAY_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

impl UserProfile {
    /// Create a profile for `user_id`, raising `profile.created`.
    pub fn create(
        user_id: UserId,
        tenant_id: TenantId,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let display_name = validate_display_name(display_name)?;
        let mut profile = Self {
            id: AggregateId::new(),
            user_id,
            tenant_id,
            display_name: display_name.clone(),
            bio: None,
            version: 0,
            events: EventBuffer::new(),
        };

        let meta = profile.event_meta(now);
        profile.raise(ProfileCreated {
            meta,
            user_id,
            tenant_id,
            display_name,
        });
        Ok(profile)
    }

    /// Rehydrate from storage with an empty event buffer.
    pub fn from_snapshot(snapshot: ProfileSnapshot) -> Self {
        Self {
            id: snapshot.id,
            user_id: snapshot.user_id,
            tenant_id: snapshot.tenant_id,
            display_name: snapshot.display_name,
            bio: snapshot.bio,
            version: snapshot.version,
            events: EventBuffer::new(),
        }
    }

    pub fn snapshot(&self) -> ProfileSnapshot {
        ProfileSnapshot {
            id: self.id,
            user_id: self.user_id,
            tenant_id: self.tenant_id,
            display_name: self.display_name.clone(),
            bio: self.bio.clone(),
            version: self.version,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn bio(&self) -> Option<&str> {
        self.bio.as_deref()
    }

    /// Change the display name. Setting the current name again is a no-op.
    pub fn rename(&mut self, display_name: &str, now: DateTime<Utc>) -> DomainResult<()> {
        let display_name = validate_display_name(display_name)?;
        if display_name == self.display_name {
            return Ok(());
        }

        let previous = std::mem::replace(&mut self.display_name, display_name);
        self.record_update(previous, now);
        Ok(())
    }

    /// Replace the bio; an empty string clears it.
    pub fn set_bio(&mut self, bio: &str, now: DateTime<Utc>) -> DomainResult<()> {
        let bio = Some(bio.trim()).filter(|b| !b.is_empty()).map(str::to_string);
        if bio.as_ref().is_some_and(|b| b.chars().count() > MAX_BIO_LEN) {
            return Err(DomainError::validation(format!(
                "bio cannot exceed {MAX_BIO_LEN} characters"
            )));
        }
        if bio == self.bio {
            return Ok(());
        }

        self.bio = bio;
        self.record_update(self.display_name.clone(), now);
        Ok(())
    }

    fn record_update(&mut self, previous_display_name: String, now: DateTime<Utc>) {
        self.version += 1;
        let event = ProfileUpdated {
            meta: self.event_meta(now),
            user_id: self.user_id,
            display_name: self.display_name.clone(),
            previous_display_name,
            bio: self.bio.clone(),
        };
        self.raise(event);
    }

    fn event_meta(&self, now: DateTime<Utc>) -> EventMetadata {
        EventMetadata::new(self.id, Self::AGGREGATE_TYPE).with_occurred_at(now)
    }
}

impl AggregateRoot for UserProfile {
    const AGGREGATE_TYPE: &'static str = "profile";

    fn aggregate_id(&self) -> AggregateId {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl EventSource for UserProfile {
    fn event_buffer(&self) -> &EventBuffer {
        &self.events
    }

    fn event_buffer_mut(&mut self) -> &mut EventBuffer {
        &mut self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn profile() -> UserProfile {
        UserProfile::create(UserId::new(), TenantId::new(), "Ada", Utc::now()).unwrap()
    }

    #[test]
    fn create_raises_created_event() {
        let mut p = profile();
        let events = p.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "profile.created");
        assert_eq!(events[0].aggregate_id(), p.aggregate_id());
        assert!(p.drain().is_empty());
    }

    #[test]
    fn updates_are_raised_in_order() {
        let mut p = profile();
        p.drain();
        let now = Utc::now();
        p.rename("Ada Lovelace", now).unwrap();
        p.set_bio("Analyst", now).unwrap();

        let events = p.drain();
        assert_eq!(events.len(), 2);
        let first = events[0].downcast_ref::<ProfileUpdated>().unwrap();
        assert_eq!(first.previous_display_name, "Ada");
        assert_eq!(first.bio, None);
        let second = events[1].downcast_ref::<ProfileUpdated>().unwrap();
        assert_eq!(second.bio.as_deref(), Some("Analyst"));
        assert_eq!(p.version(), 2);
    }

    #[test]
    fn unchanged_values_raise_nothing() {
        let mut p = profile();
        p.drain();
        p.rename("  Ada ", Utc::now()).unwrap();
        p.set_bio("", Utc::now()).unwrap();
        assert!(!p.has_pending_events());
        assert_eq!(p.version(), 0);
    }

    #[test]
    fn failed_validation_leaves_state_and_buffer_untouched() {
        let mut p = profile();
        p.drain();
        assert!(p.rename("   ", Utc::now()).is_err());
        assert!(p.set_bio(&"x".repeat(MAX_BIO_LEN + 1), Utc::now()).is_err());
        assert_eq!(p.display_name(), "Ada");
        assert!(!p.has_pending_events());
    }

    #[test]
    fn snapshot_rehydrates_without_events() {
        let p = profile();
        let restored = UserProfile::from_snapshot(p.snapshot());
        assert_eq!(restored.snapshot(), p.snapshot());
        assert!(!restored.has_pending_events());
    }

    proptest! {
        #[test]
        fn every_accepted_rename_raises_exactly_one_event(
            names in proptest::collection::vec("[a-zA-Z]{1,20}", 1..10),
        ) {
            let mut p = profile();
            p.drain();
            let mut expected = 0usize;
            for name in &names {
                let before = p.display_name().to_string();
                p.rename(name, Utc::now()).unwrap();
                if before != *name {
                    expected += 1;
                }
            }
            prop_assert_eq!(p.pending_events().len(), expected);
            prop_assert_eq!(p.version() as usize, expected);
        }
    }
}
