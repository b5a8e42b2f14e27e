use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use campus_auth::{
    GrantKey, GrantRecord, GrantRepository, GrantStore, GrantStoreError, PermissionGrant,
};
use campus_core::{DomainError, ExpectedVersion, GrantId};

type FaultPredicate = Box<dyn Fn(&GrantKey) -> bool + Send + Sync>;

/// In-memory grant table.
///
/// Intended for tests/dev. Lookups are a linear scan, which is fine for the
/// handful of grants a test seeds.
///
/// Two failure knobs exist so callers can exercise the resolver's fault paths:
/// resource types that do not support per-instance grants, and an arbitrary
/// key predicate that turns matching lookups into backend errors.
#[derive(Default)]
pub struct InMemoryGrantStore {
    rows: RwLock<HashMap<GrantId, GrantRecord>>,
    no_instance_grants: RwLock<HashSet<String>>,
    fault: RwLock<Option<FaultPredicate>>,
}

impl core::fmt::Debug for InMemoryGrantStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let rows = self.rows.read().map(|r| r.len()).unwrap_or_default();
        f.debug_struct("InMemoryGrantStore").field("rows", &rows).finish()
    }
}

impl InMemoryGrantStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a grant without a version check (bootstrap seeding).
    pub fn seed(&self, grant: &PermissionGrant) -> Result<(), GrantStoreError> {
        let mut rows = self.write_rows()?;
        rows.insert(grant.id(), grant.record().clone());
        Ok(())
    }

    /// Lookups for `resource_type` with a resource id fail as unsupported.
    pub fn without_instance_grants(self, resource_type: impl Into<String>) -> Self {
        if let Ok(mut set) = self.no_instance_grants.write() {
            set.insert(resource_type.into());
        }
        self
    }

    /// Fail every lookup whose key matches `predicate`.
    pub fn fail_lookups_where<F>(&self, predicate: F)
    where
        F: Fn(&GrantKey) -> bool + Send + Sync + 'static,
    {
        if let Ok(mut fault) = self.fault.write() {
            *fault = Some(Box::new(predicate));
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut fault) = self.fault.write() {
            *fault = None;
        }
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write_rows(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<GrantId, GrantRecord>>, GrantStoreError> {
        self.rows
            .write()
            .map_err(|_| GrantStoreError::backend("lock poisoned"))
    }

    fn check_faults(&self, key: &GrantKey) -> Result<(), GrantStoreError> {
        if let (Some(resource_type), Some(_)) = (&key.resource_type, key.resource_id) {
            let unsupported = self
                .no_instance_grants
                .read()
                .map_err(|_| GrantStoreError::backend("lock poisoned"))?
                .contains(resource_type);
            if unsupported {
                return Err(GrantStoreError::UnsupportedScope(format!(
                    "{resource_type} does not support per-instance grants"
                )));
            }
        }

        let fault = self
            .fault
            .read()
            .map_err(|_| GrantStoreError::backend("lock poisoned"))?;
        if fault.as_ref().is_some_and(|matches| matches(key)) {
            return Err(GrantStoreError::backend("injected lookup fault"));
        }
        Ok(())
    }
}

#[async_trait]
impl GrantStore for InMemoryGrantStore {
    async fn find_grants(&self, key: &GrantKey) -> Result<Vec<PermissionGrant>, GrantStoreError> {
        self.check_faults(key)?;

        let rows = self
            .rows
            .read()
            .map_err(|_| GrantStoreError::backend("lock poisoned"))?;

        let mut matches: Vec<&GrantRecord> = rows
            .values()
            .filter(|r| {
                r.subject_id == key.subject_id
                    && r.tenant_id == key.tenant_id
                    && r.resource_type == key.resource_type
                    && r.resource_id == key.resource_id
            })
            .collect();
        matches.sort_by_key(|r| r.created_at);

        matches
            .into_iter()
            .map(|r| PermissionGrant::from_record(r.clone()).map_err(GrantStoreError::from))
            .collect()
    }
}

#[async_trait]
impl GrantRepository for InMemoryGrantStore {
    async fn get(&self, id: GrantId) -> Result<PermissionGrant, GrantStoreError> {
        let record = self
            .rows
            .read()
            .map_err(|_| GrantStoreError::backend("lock poisoned"))?
            .get(&id)
            .cloned()
            .ok_or(DomainError::NotFound)?;
        Ok(PermissionGrant::from_record(record)?)
    }

    async fn save(
        &self,
        grant: &PermissionGrant,
        expected: ExpectedVersion,
    ) -> Result<(), GrantStoreError> {
        let mut rows = self.write_rows()?;
        let current = rows.get(&grant.id()).map(|r| r.version).unwrap_or(0);
        expected.check(current)?;
        rows.insert(grant.id(), grant.record().clone());
        Ok(())
    }
}
