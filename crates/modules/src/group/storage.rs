//! Storage layer for the group module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use harbor_core::error::{StorageError, StorageResult};
use harbor_storage::Database;

/// A group row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub group_id: String,
    pub group_name: String,
    pub owner: String,
    pub source_type: String,
    pub removed: bool,
    pub create_at: i64,
    pub create_tx_hash: String,
    pub create_time: i64,
    pub update_at: i64,
    pub update_tx_hash: String,
    pub update_time: i64,
}

/// A group membership row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMember {
    pub group_id: String,
    pub member: String,
    pub expiration_time: Option<i64>,
    pub removed: bool,
    pub update_at: i64,
    pub update_tx_hash: String,
    pub update_time: i64,
}

/// Mutation metadata for group-level changes.
#[derive(Debug, Clone)]
pub struct GroupMutation {
    pub group_id: String,
    pub update_at: i64,
    pub update_tx_hash: String,
    pub update_time: i64,
}

/// Storage trait for groups and their memberships.
#[async_trait]
pub trait GroupStorage: Send + Sync {
    async fn prepare_tables(&self) -> StorageResult<()>;
    async fn save_group(&self, group: &Group) -> StorageResult<()>;
    /// Tombstone the group and all its memberships.
    async fn remove_group(&self, mutation: &GroupMutation) -> StorageResult<()>;
    async fn save_members(&self, members: &[GroupMember]) -> StorageResult<()>;
    /// Tombstone specific memberships.
    async fn remove_members(
        &self,
        mutation: &GroupMutation,
        members: &[String],
    ) -> StorageResult<()>;
}

/// PostgreSQL implementation of GroupStorage.
pub struct PgGroupStorage {
    db: Database,
}

impl PgGroupStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl GroupStorage for PgGroupStorage {
    async fn prepare_tables(&self) -> StorageResult<()> {
        self.db.run_module_migrations("group", MIGRATIONS).await
    }

    async fn save_group(&self, group: &Group) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO groups (
                group_id, group_name, owner, source_type, removed,
                create_at, create_tx_hash, create_time,
                update_at, update_tx_hash, update_time
            )
            VALUES ($1::NUMERIC, $2, $3, $4, FALSE, $5, $6, $7, $5, $6, $7)
            ON CONFLICT (group_id) DO UPDATE SET
                group_name = CASE WHEN groups.update_at > EXCLUDED.update_at
                                  THEN groups.group_name ELSE EXCLUDED.group_name END,
                owner = CASE WHEN groups.update_at > EXCLUDED.update_at
                             THEN groups.owner ELSE EXCLUDED.owner END,
                removed = CASE WHEN groups.update_at > EXCLUDED.update_at
                               THEN groups.removed ELSE FALSE END,
                create_at = EXCLUDED.create_at,
                create_tx_hash = EXCLUDED.create_tx_hash,
                create_time = EXCLUDED.create_time,
                update_tx_hash = CASE WHEN groups.update_at > EXCLUDED.update_at
                                      THEN groups.update_tx_hash ELSE EXCLUDED.update_tx_hash END,
                update_time = CASE WHEN groups.update_at > EXCLUDED.update_at
                                   THEN groups.update_time ELSE EXCLUDED.update_time END,
                update_at = GREATEST(groups.update_at, EXCLUDED.update_at)
            "#,
        )
        .bind(&group.group_id)
        .bind(&group.group_name)
        .bind(&group.owner)
        .bind(&group.source_type)
        .bind(group.create_at)
        .bind(&group.create_tx_hash)
        .bind(group.create_time)
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }

    async fn remove_group(&self, mutation: &GroupMutation) -> StorageResult<()> {
        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        sqlx::query(
            r#"
            UPDATE groups SET
                removed = TRUE, update_at = $2, update_tx_hash = $3, update_time = $4
            WHERE group_id = $1::NUMERIC AND update_at <= $2
            "#,
        )
        .bind(&mutation.group_id)
        .bind(mutation.update_at)
        .bind(&mutation.update_tx_hash)
        .bind(mutation.update_time)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        sqlx::query(
            r#"
            UPDATE group_members SET
                removed = TRUE, update_at = $2, update_tx_hash = $3, update_time = $4
            WHERE group_id = $1::NUMERIC AND update_at <= $2
            "#,
        )
        .bind(&mutation.group_id)
        .bind(mutation.update_at)
        .bind(&mutation.update_tx_hash)
        .bind(mutation.update_time)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        Ok(())
    }

    async fn save_members(&self, members: &[GroupMember]) -> StorageResult<()> {
        if members.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        for member in members {
            sqlx::query(
                r#"
                INSERT INTO group_members (
                    group_id, member, expiration_time, removed,
                    update_at, update_tx_hash, update_time
                )
                VALUES ($1::NUMERIC, $2, $3, FALSE, $4, $5, $6)
                ON CONFLICT (group_id, member) DO UPDATE SET
                    expiration_time = CASE WHEN group_members.update_at > EXCLUDED.update_at
                                           THEN group_members.expiration_time
                                           ELSE EXCLUDED.expiration_time END,
                    removed = CASE WHEN group_members.update_at > EXCLUDED.update_at
                                   THEN group_members.removed ELSE FALSE END,
                    update_tx_hash = CASE WHEN group_members.update_at > EXCLUDED.update_at
                                          THEN group_members.update_tx_hash
                                          ELSE EXCLUDED.update_tx_hash END,
                    update_time = CASE WHEN group_members.update_at > EXCLUDED.update_at
                                       THEN group_members.update_time ELSE EXCLUDED.update_time END,
                    update_at = GREATEST(group_members.update_at, EXCLUDED.update_at)
                "#,
            )
            .bind(&member.group_id)
            .bind(&member.member)
            .bind(member.expiration_time)
            .bind(member.update_at)
            .bind(&member.update_tx_hash)
            .bind(member.update_time)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        Ok(())
    }

    async fn remove_members(
        &self,
        mutation: &GroupMutation,
        members: &[String],
    ) -> StorageResult<()> {
        if members.is_empty() {
            return Ok(());
        }

        sqlx::query(
            r#"
            UPDATE group_members SET
                removed = TRUE, update_at = $3, update_tx_hash = $4, update_time = $5
            WHERE group_id = $1::NUMERIC AND member = ANY($2) AND update_at <= $3
            "#,
        )
        .bind(&mutation.group_id)
        .bind(members)
        .bind(mutation.update_at)
        .bind(&mutation.update_tx_hash)
        .bind(mutation.update_time)
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }
}

/// SQL migrations for the group module.
pub const MIGRATIONS: &[&str] = &[
    // Migration 0: groups and memberships
    r#"
CREATE TABLE groups (
    group_id NUMERIC(78, 0) PRIMARY KEY,
    group_name TEXT NOT NULL,
    owner TEXT NOT NULL DEFAULT '',
    source_type TEXT NOT NULL DEFAULT '',
    removed BOOLEAN NOT NULL DEFAULT FALSE,
    create_at BIGINT NOT NULL DEFAULT 0,
    create_tx_hash TEXT NOT NULL DEFAULT '',
    create_time BIGINT NOT NULL DEFAULT 0,
    update_at BIGINT NOT NULL DEFAULT 0,
    update_tx_hash TEXT NOT NULL DEFAULT '',
    update_time BIGINT NOT NULL DEFAULT 0
);

CREATE INDEX idx_groups_name ON groups(group_name);
CREATE INDEX idx_groups_owner ON groups(owner);

CREATE TABLE group_members (
    group_id NUMERIC(78, 0) NOT NULL,
    member TEXT NOT NULL,
    expiration_time BIGINT,
    removed BOOLEAN NOT NULL DEFAULT FALSE,
    update_at BIGINT NOT NULL DEFAULT 0,
    update_tx_hash TEXT NOT NULL DEFAULT '',
    update_time BIGINT NOT NULL DEFAULT 0,
    PRIMARY KEY (group_id, member)
);

CREATE INDEX idx_group_members_member ON group_members(member);
"#,
];
