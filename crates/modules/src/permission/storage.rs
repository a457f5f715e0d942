//! Storage layer for the permission module.
//!
//! Policies and their statements land in two tables that must stay
//! consistent, so writes go through an explicit transaction handle:
//! `begin` yields a [`PermissionTx`] exposing the same write
//! operations plus `commit`/`rollback`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, Transaction};

use harbor_core::error::{StorageError, StorageResult};
use harbor_storage::Database;

/// A policy row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub policy_id: String,
    pub principal_type: String,
    pub principal_value: String,
    pub resource_type: String,
    pub resource_id: String,
    pub expiration_time: Option<i64>,
    pub removed: bool,
    pub create_at: i64,
    pub create_tx_hash: String,
    pub create_time: i64,
    pub update_at: i64,
    pub update_tx_hash: String,
    pub update_time: i64,
}

/// One statement of a policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    pub policy_id: String,
    pub statement_index: i32,
    pub effect: String,
    pub actions: Vec<String>,
    pub resources: Vec<String>,
    pub expiration_time: Option<i64>,
    pub removed: bool,
    pub update_at: i64,
}

/// Tombstone metadata for a deleted policy.
#[derive(Debug, Clone)]
pub struct PolicyRemoval {
    pub policy_id: String,
    pub update_at: i64,
    pub update_tx_hash: String,
    pub update_time: i64,
}

/// An in-flight multi-table write. Dropping the handle without
/// committing discards the work.
#[async_trait]
pub trait PermissionTx: Send {
    async fn save_permission(&mut self, permission: &Permission) -> StorageResult<()>;
    async fn save_statements(&mut self, statements: &[Statement]) -> StorageResult<()>;
    async fn commit(self: Box<Self>) -> StorageResult<()>;
    async fn rollback(self: Box<Self>) -> StorageResult<()>;
}

/// Storage trait for policies.
#[async_trait]
pub trait PermissionStorage: Send + Sync {
    async fn prepare_tables(&self) -> StorageResult<()>;

    /// Open a transaction covering the permission and statement
    /// tables.
    async fn begin(&self) -> StorageResult<Box<dyn PermissionTx>>;

    /// Tombstone a policy and its statements.
    async fn remove_policy(&self, removal: &PolicyRemoval) -> StorageResult<()>;
}

// =============================================================================
// PostgreSQL implementation
// =============================================================================

pub struct PgPermissionStorage {
    db: Database,
}

impl PgPermissionStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

pub struct PgPermissionTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl PermissionTx for PgPermissionTx {
    async fn save_permission(&mut self, permission: &Permission) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO permissions (
                policy_id, principal_type, principal_value, resource_type, resource_id,
                expiration_time, removed,
                create_at, create_tx_hash, create_time,
                update_at, update_tx_hash, update_time
            )
            VALUES ($1::NUMERIC, $2, $3, $4, $5::NUMERIC, $6, FALSE, $7, $8, $9, $7, $8, $9)
            ON CONFLICT (policy_id) DO UPDATE SET
                principal_type = EXCLUDED.principal_type,
                principal_value = EXCLUDED.principal_value,
                resource_type = EXCLUDED.resource_type,
                resource_id = EXCLUDED.resource_id,
                expiration_time = EXCLUDED.expiration_time,
                removed = CASE WHEN permissions.update_at > EXCLUDED.update_at
                               THEN permissions.removed ELSE FALSE END,
                update_tx_hash = CASE WHEN permissions.update_at > EXCLUDED.update_at
                                      THEN permissions.update_tx_hash
                                      ELSE EXCLUDED.update_tx_hash END,
                update_time = CASE WHEN permissions.update_at > EXCLUDED.update_at
                                   THEN permissions.update_time ELSE EXCLUDED.update_time END,
                update_at = GREATEST(permissions.update_at, EXCLUDED.update_at)
            "#,
        )
        .bind(&permission.policy_id)
        .bind(&permission.principal_type)
        .bind(&permission.principal_value)
        .bind(&permission.resource_type)
        .bind(&permission.resource_id)
        .bind(permission.expiration_time)
        .bind(permission.create_at)
        .bind(&permission.create_tx_hash)
        .bind(permission.create_time)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }

    async fn save_statements(&mut self, statements: &[Statement]) -> StorageResult<()> {
        for statement in statements {
            sqlx::query(
                r#"
                INSERT INTO statements (
                    policy_id, statement_index, effect, actions, resources,
                    expiration_time, removed, update_at
                )
                VALUES ($1::NUMERIC, $2, $3, $4, $5, $6, FALSE, $7)
                ON CONFLICT (policy_id, statement_index) DO UPDATE SET
                    effect = EXCLUDED.effect,
                    actions = EXCLUDED.actions,
                    resources = EXCLUDED.resources,
                    expiration_time = EXCLUDED.expiration_time,
                    removed = FALSE,
                    update_at = GREATEST(statements.update_at, EXCLUDED.update_at)
                "#,
            )
            .bind(&statement.policy_id)
            .bind(statement.statement_index)
            .bind(&statement.effect)
            .bind(&statement.actions)
            .bind(&statement.resources)
            .bind(statement.expiration_time)
            .bind(statement.update_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;
        }

        Ok(())
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))
    }
}

#[async_trait]
impl PermissionStorage for PgPermissionStorage {
    async fn prepare_tables(&self) -> StorageResult<()> {
        self.db.run_module_migrations("permission", MIGRATIONS).await
    }

    async fn begin(&self) -> StorageResult<Box<dyn PermissionTx>> {
        let tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;
        Ok(Box::new(PgPermissionTx { tx }))
    }

    async fn remove_policy(&self, removal: &PolicyRemoval) -> StorageResult<()> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        sqlx::query(
            r#"
            UPDATE permissions SET
                removed = TRUE, update_at = $2, update_tx_hash = $3, update_time = $4
            WHERE policy_id = $1::NUMERIC AND update_at <= $2
            "#,
        )
        .bind(&removal.policy_id)
        .bind(removal.update_at)
        .bind(&removal.update_tx_hash)
        .bind(removal.update_time)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        sqlx::query(
            r#"
            UPDATE statements SET removed = TRUE, update_at = $2
            WHERE policy_id = $1::NUMERIC AND update_at <= $2
            "#,
        )
        .bind(&removal.policy_id)
        .bind(removal.update_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        Ok(())
    }
}

/// SQL migrations for the permission module.
pub const MIGRATIONS: &[&str] = &[
    // Migration 0: permissions and statements
    r#"
CREATE TABLE permissions (
    policy_id NUMERIC(78, 0) PRIMARY KEY,
    principal_type TEXT NOT NULL DEFAULT '',
    principal_value TEXT NOT NULL DEFAULT '',
    resource_type TEXT NOT NULL DEFAULT '',
    resource_id NUMERIC(78, 0) NOT NULL DEFAULT 0,
    expiration_time BIGINT,
    removed BOOLEAN NOT NULL DEFAULT FALSE,
    create_at BIGINT NOT NULL DEFAULT 0,
    create_tx_hash TEXT NOT NULL DEFAULT '',
    create_time BIGINT NOT NULL DEFAULT 0,
    update_at BIGINT NOT NULL DEFAULT 0,
    update_tx_hash TEXT NOT NULL DEFAULT '',
    update_time BIGINT NOT NULL DEFAULT 0
);

CREATE INDEX idx_permissions_principal ON permissions(principal_value);
CREATE INDEX idx_permissions_resource ON permissions(resource_type, resource_id);

CREATE TABLE statements (
    policy_id NUMERIC(78, 0) NOT NULL,
    statement_index INTEGER NOT NULL,
    effect TEXT NOT NULL DEFAULT '',
    actions TEXT[] NOT NULL DEFAULT '{}',
    resources TEXT[] NOT NULL DEFAULT '{}',
    expiration_time BIGINT,
    removed BOOLEAN NOT NULL DEFAULT FALSE,
    update_at BIGINT NOT NULL DEFAULT 0,
    PRIMARY KEY (policy_id, statement_index)
);
"#,
];
