//! Postgres-backed grant store.
//!
//! One row per grant in `permission_grants`. Lookups hit the composite index
//! on `(subject_id, tenant_id, resource_type, resource_id)`; nullable key
//! parts are compared with `IS NOT DISTINCT FROM` so `NULL` matches `NULL`.
//!
//! Every SQLx error maps to `GrantStoreError::Backend`; version conflicts are
//! detected under a row lock before the write and reported as
//! `Domain(VersionConflict)`.
//!
//! Flag words are stored as `BIGINT`; the `u64 <-> i64` casts preserve bits.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use campus_auth::{
    GrantKey, GrantRecord, GrantRepository, GrantStore, GrantStoreError, PermissionFlags,
    PermissionGrant,
};
use campus_core::{DomainError, ExpectedVersion, GrantId};

/// Table and index definitions, applied by [`PostgresGrantStore::ensure_schema`].
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS permission_grants (
    id            UUID PRIMARY KEY,
    subject_id    UUID NULL,
    tenant_id     UUID NULL,
    resource_type TEXT NULL,
    resource_id   UUID NULL,
    flags_word0   BIGINT NOT NULL,
    flags_word1   BIGINT NOT NULL,
    created_at    TIMESTAMPTZ NOT NULL,
    expires_at    TIMESTAMPTZ NULL,
    deleted_at    TIMESTAMPTZ NULL,
    version       BIGINT NOT NULL CHECK (version >= 0),
    CHECK (resource_id IS NULL OR (resource_type IS NOT NULL AND subject_id IS NOT NULL))
);

CREATE INDEX IF NOT EXISTS permission_grants_scope_idx
    ON permission_grants (subject_id, tenant_id, resource_type, resource_id);
"#;

#[derive(Debug, Clone)]
pub struct PostgresGrantStore {
    pool: Arc<PgPool>,
}

impl PostgresGrantStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), GrantStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait]
impl GrantStore for PostgresGrantStore {
    #[instrument(skip(self), fields(resource_type = ?key.resource_type), err)]
    async fn find_grants(&self, key: &GrantKey) -> Result<Vec<PermissionGrant>, GrantStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                id, subject_id, tenant_id, resource_type, resource_id,
                flags_word0, flags_word1, created_at, expires_at, deleted_at, version
            FROM permission_grants
            WHERE subject_id IS NOT DISTINCT FROM $1
              AND tenant_id IS NOT DISTINCT FROM $2
              AND resource_type IS NOT DISTINCT FROM $3
              AND resource_id IS NOT DISTINCT FROM $4
            ORDER BY created_at ASC
            "#,
        )
        .bind(key.subject_id.map(Uuid::from))
        .bind(key.tenant_id.map(Uuid::from))
        .bind(key.resource_type.as_deref())
        .bind(key.resource_id.map(Uuid::from))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_grants", e))?;

        rows.iter()
            .map(|row| {
                let record = GrantRow::from_row(row)
                    .map_err(|e| {
                        GrantStoreError::backend(format!("failed to decode grant row: {e}"))
                    })?
                    .into_record();
                Ok(PermissionGrant::from_record(record)?)
            })
            .collect()
    }
}

#[async_trait]
impl GrantRepository for PostgresGrantStore {
    #[instrument(skip(self), fields(grant_id = %id), err)]
    async fn get(&self, id: GrantId) -> Result<PermissionGrant, GrantStoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                id, subject_id, tenant_id, resource_type, resource_id,
                flags_word0, flags_word1, created_at, expires_at, deleted_at, version
            FROM permission_grants
            WHERE id = $1
            "#,
        )
        .bind(Uuid::from(id))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_grant", e))?
        .ok_or(DomainError::NotFound)?;

        let record = GrantRow::from_row(&row)
            .map_err(|e| GrantStoreError::backend(format!("failed to decode grant row: {e}")))?
            .into_record();
        Ok(PermissionGrant::from_record(record)?)
    }

    /// Version check and upsert in one transaction; the row lock taken by
    /// `FOR UPDATE` keeps two admins from both passing the check.
    #[instrument(skip(self, grant), fields(grant_id = %grant.id(), expected = ?expected), err)]
    async fn save(
        &self,
        grant: &PermissionGrant,
        expected: ExpectedVersion,
    ) -> Result<(), GrantStoreError> {
        let record = grant.record();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let current: Option<i64> =
            sqlx::query_scalar("SELECT version FROM permission_grants WHERE id = $1 FOR UPDATE")
                .bind(Uuid::from(record.id))
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("load_version", e))?;

        if let Err(conflict) = expected.check(current.unwrap_or(0) as u64) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(conflict.into());
        }

        let (word0, word1) = record.flags.words();
        sqlx::query(
            r#"
            INSERT INTO permission_grants (
                id, subject_id, tenant_id, resource_type, resource_id,
                flags_word0, flags_word1, created_at, expires_at, deleted_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                flags_word0 = EXCLUDED.flags_word0,
                flags_word1 = EXCLUDED.flags_word1,
                expires_at = EXCLUDED.expires_at,
                deleted_at = EXCLUDED.deleted_at,
                version = EXCLUDED.version
            "#,
        )
        .bind(Uuid::from(record.id))
        .bind(record.subject_id.map(Uuid::from))
        .bind(record.tenant_id.map(Uuid::from))
        .bind(record.resource_type.as_deref())
        .bind(record.resource_id.map(Uuid::from))
        .bind(word0 as i64)
        .bind(word1 as i64)
        .bind(record.created_at)
        .bind(record.expires_at)
        .bind(record.deleted_at)
        .bind(record.version as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("upsert_grant", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(())
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> GrantStoreError {
    match err {
        sqlx::Error::Database(db_err) => GrantStoreError::backend(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            GrantStoreError::backend(format!("connection pool closed during {operation}"))
        }
        other => GrantStoreError::backend(format!("{operation} failed: {other}")),
    }
}

// SQLx row types

#[derive(Debug)]
struct GrantRow {
    id: Uuid,
    subject_id: Option<Uuid>,
    tenant_id: Option<Uuid>,
    resource_type: Option<String>,
    resource_id: Option<Uuid>,
    flags_word0: i64,
    flags_word1: i64,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    deleted_at: Option<DateTime<Utc>>,
    version: i64,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for GrantRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(GrantRow {
            id: row.try_get("id")?,
            subject_id: row.try_get("subject_id")?,
            tenant_id: row.try_get("tenant_id")?,
            resource_type: row.try_get("resource_type")?,
            resource_id: row.try_get("resource_id")?,
            flags_word0: row.try_get("flags_word0")?,
            flags_word1: row.try_get("flags_word1")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            deleted_at: row.try_get("deleted_at")?,
            version: row.try_get("version")?,
        })
    }
}

impl GrantRow {
    fn into_record(self) -> GrantRecord {
        GrantRecord {
            id: self.id.into(),
            subject_id: self.subject_id.map(Into::into),
            tenant_id: self.tenant_id.map(Into::into),
            resource_type: self.resource_type,
            resource_id: self.resource_id.map(Into::into),
            flags: PermissionFlags::from_words(self.flags_word0 as u64, self.flags_word1 as u64),
            created_at: self.created_at,
            expires_at: self.expires_at,
            deleted_at: self.deleted_at,
            version: self.version as u64,
        }
    }
}
