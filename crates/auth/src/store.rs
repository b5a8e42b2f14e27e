//! Grant persistence ports.
//!
//! The resolver only reads ([`GrantStore`]); admin flows load and save whole
//! grant aggregates ([`GrantRepository`]). Implementations live in the infra
//! crate.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use campus_core::{DomainError, ExpectedVersion, GrantId};

use crate::{GrantKey, PermissionGrant};

#[derive(Debug, Error)]
pub enum GrantStoreError {
    /// The backing store could not be reached or returned garbage.
    #[error("grant store backend error: {0}")]
    Backend(String),

    /// The store cannot answer queries of this key shape.
    #[error("unsupported grant scope: {0}")]
    UnsupportedScope(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl GrantStoreError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Read side used by the permission resolver.
#[async_trait]
pub trait GrantStore: Send + Sync {
    /// Every grant whose key equals `key`, including expired and revoked ones.
    /// Callers filter by validity.
    async fn find_grants(&self, key: &GrantKey) -> Result<Vec<PermissionGrant>, GrantStoreError>;
}

/// Aggregate load/save for grant administration.
#[async_trait]
pub trait GrantRepository: Send + Sync {
    async fn get(&self, id: GrantId) -> Result<PermissionGrant, GrantStoreError>;

    /// Persist the grant's current state. `expected` is checked against the
    /// stored version before writing; a brand-new grant is saved with
    /// `ExpectedVersion::Exact(0)`.
    async fn save(
        &self,
        grant: &PermissionGrant,
        expected: ExpectedVersion,
    ) -> Result<(), GrantStoreError>;
}

#[async_trait]
impl<S: GrantStore + ?Sized> GrantStore for Arc<S> {
    async fn find_grants(&self, key: &GrantKey) -> Result<Vec<PermissionGrant>, GrantStoreError> {
        (**self).find_grants(key).await
    }
}

#[async_trait]
impl<R: GrantRepository + ?Sized> GrantRepository for Arc<R> {
    async fn get(&self, id: GrantId) -> Result<PermissionGrant, GrantStoreError> {
        (**self).get(id).await
    }

    async fn save(
        &self,
        grant: &PermissionGrant,
        expected: ExpectedVersion,
    ) -> Result<(), GrantStoreError> {
        (**self).save(grant, expected).await
    }
}
