//! Storage layer for the virtual-group module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use harbor_core::error::{StorageError, StorageResult};
use harbor_storage::Database;

/// A global virtual group row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalVirtualGroup {
    pub id: i64,
    pub family_id: i64,
    pub primary_sp_id: i64,
    pub secondary_sp_ids: Vec<i64>,
    pub stored_size: u64,
    pub virtual_payment_address: String,
    pub total_deposit: String,
    pub removed: bool,
    pub create_at: i64,
    pub create_tx_hash: String,
    pub create_time: i64,
    pub update_at: i64,
    pub update_tx_hash: String,
    pub update_time: i64,
}

/// A global virtual group family row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalVirtualGroupFamily {
    pub id: i64,
    pub primary_sp_id: i64,
    pub virtual_payment_address: String,
    pub create_at: i64,
    pub create_tx_hash: String,
    pub create_time: i64,
    pub update_at: i64,
    pub update_tx_hash: String,
    pub update_time: i64,
}

/// A local virtual group row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalVirtualGroup {
    pub id: i64,
    pub global_virtual_group_id: i64,
    pub bucket_id: String,
    pub stored_size: u64,
    pub create_at: i64,
    pub create_tx_hash: String,
    pub create_time: i64,
    pub update_at: i64,
    pub update_tx_hash: String,
    pub update_time: i64,
}

/// Mutation applied to an existing global virtual group.
#[derive(Debug, Clone)]
pub struct GvgUpdate {
    pub id: i64,
    pub stored_size: u64,
    pub secondary_sp_ids: Vec<i64>,
    pub total_deposit: String,
    pub update_at: i64,
    pub update_tx_hash: String,
    pub update_time: i64,
}

/// Mutation applied to an existing local virtual group.
#[derive(Debug, Clone)]
pub struct LvgUpdate {
    pub id: i64,
    pub global_virtual_group_id: i64,
    pub stored_size: u64,
    pub update_at: i64,
    pub update_tx_hash: String,
    pub update_time: i64,
}

/// Storage trait for the three virtual-group tables.
#[async_trait]
pub trait VirtualGroupStorage: Send + Sync {
    async fn prepare_tables(&self) -> StorageResult<()>;
    async fn save_global_virtual_group(&self, gvg: &GlobalVirtualGroup) -> StorageResult<()>;
    async fn update_global_virtual_group(&self, update: &GvgUpdate) -> StorageResult<()>;
    async fn remove_global_virtual_group(
        &self,
        id: i64,
        update_at: i64,
        update_tx_hash: &str,
        update_time: i64,
    ) -> StorageResult<()>;
    async fn save_family(&self, family: &GlobalVirtualGroupFamily) -> StorageResult<()>;
    async fn save_local_virtual_group(&self, lvg: &LocalVirtualGroup) -> StorageResult<()>;
    async fn update_local_virtual_group(&self, update: &LvgUpdate) -> StorageResult<()>;
}

/// PostgreSQL implementation of VirtualGroupStorage.
pub struct PgVirtualGroupStorage {
    db: Database,
}

impl PgVirtualGroupStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl VirtualGroupStorage for PgVirtualGroupStorage {
    async fn prepare_tables(&self) -> StorageResult<()> {
        self.db
            .run_module_migrations("virtual_group", MIGRATIONS)
            .await
    }

    async fn save_global_virtual_group(&self, gvg: &GlobalVirtualGroup) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO global_virtual_groups (
                id, family_id, primary_sp_id, secondary_sp_ids, stored_size,
                virtual_payment_address, total_deposit, removed,
                create_at, create_tx_hash, create_time,
                update_at, update_tx_hash, update_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7::NUMERIC, FALSE, $8, $9, $10, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                stored_size = CASE WHEN global_virtual_groups.update_at > EXCLUDED.update_at
                                   THEN global_virtual_groups.stored_size ELSE EXCLUDED.stored_size END,
                secondary_sp_ids = CASE WHEN global_virtual_groups.update_at > EXCLUDED.update_at
                                        THEN global_virtual_groups.secondary_sp_ids
                                        ELSE EXCLUDED.secondary_sp_ids END,
                removed = CASE WHEN global_virtual_groups.update_at > EXCLUDED.update_at
                               THEN global_virtual_groups.removed ELSE FALSE END,
                create_at = EXCLUDED.create_at,
                create_tx_hash = EXCLUDED.create_tx_hash,
                create_time = EXCLUDED.create_time,
                update_at = GREATEST(global_virtual_groups.update_at, EXCLUDED.update_at)
            "#,
        )
        .bind(gvg.id)
        .bind(gvg.family_id)
        .bind(gvg.primary_sp_id)
        .bind(&gvg.secondary_sp_ids)
        .bind(gvg.stored_size as i64)
        .bind(&gvg.virtual_payment_address)
        .bind(&gvg.total_deposit)
        .bind(gvg.create_at)
        .bind(&gvg.create_tx_hash)
        .bind(gvg.create_time)
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }

    async fn update_global_virtual_group(&self, update: &GvgUpdate) -> StorageResult<()> {
        sqlx::query(
            r#"
            UPDATE global_virtual_groups SET
                stored_size = $2,
                secondary_sp_ids = $3,
                total_deposit = $4::NUMERIC,
                update_at = $5,
                update_tx_hash = $6,
                update_time = $7
            WHERE id = $1 AND update_at <= $5
            "#,
        )
        .bind(update.id)
        .bind(update.stored_size as i64)
        .bind(&update.secondary_sp_ids)
        .bind(&update.total_deposit)
        .bind(update.update_at)
        .bind(&update.update_tx_hash)
        .bind(update.update_time)
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }

    async fn remove_global_virtual_group(
        &self,
        id: i64,
        update_at: i64,
        update_tx_hash: &str,
        update_time: i64,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            UPDATE global_virtual_groups SET
                removed = TRUE, update_at = $2, update_tx_hash = $3, update_time = $4
            WHERE id = $1 AND update_at <= $2
            "#,
        )
        .bind(id)
        .bind(update_at)
        .bind(update_tx_hash)
        .bind(update_time)
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }

    async fn save_family(&self, family: &GlobalVirtualGroupFamily) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO global_virtual_group_families (
                id, primary_sp_id, virtual_payment_address,
                create_at, create_tx_hash, create_time,
                update_at, update_tx_hash, update_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                primary_sp_id = EXCLUDED.primary_sp_id,
                virtual_payment_address = EXCLUDED.virtual_payment_address,
                update_at = GREATEST(global_virtual_group_families.update_at, EXCLUDED.update_at)
            "#,
        )
        .bind(family.id)
        .bind(family.primary_sp_id)
        .bind(&family.virtual_payment_address)
        .bind(family.create_at)
        .bind(&family.create_tx_hash)
        .bind(family.create_time)
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }

    async fn save_local_virtual_group(&self, lvg: &LocalVirtualGroup) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO local_virtual_groups (
                id, global_virtual_group_id, bucket_id, stored_size,
                create_at, create_tx_hash, create_time,
                update_at, update_tx_hash, update_time
            )
            VALUES ($1, $2, $3::NUMERIC, $4, $5, $6, $7, $5, $6, $7)
            ON CONFLICT (id, bucket_id) DO UPDATE SET
                global_virtual_group_id = EXCLUDED.global_virtual_group_id,
                stored_size = CASE WHEN local_virtual_groups.update_at > EXCLUDED.update_at
                                   THEN local_virtual_groups.stored_size ELSE EXCLUDED.stored_size END,
                update_at = GREATEST(local_virtual_groups.update_at, EXCLUDED.update_at)
            "#,
        )
        .bind(lvg.id)
        .bind(lvg.global_virtual_group_id)
        .bind(&lvg.bucket_id)
        .bind(lvg.stored_size as i64)
        .bind(lvg.create_at)
        .bind(&lvg.create_tx_hash)
        .bind(lvg.create_time)
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }

    async fn update_local_virtual_group(&self, update: &LvgUpdate) -> StorageResult<()> {
        sqlx::query(
            r#"
            UPDATE local_virtual_groups SET
                global_virtual_group_id = $2,
                stored_size = $3,
                update_at = $4,
                update_tx_hash = $5,
                update_time = $6
            WHERE id = $1 AND update_at <= $4
            "#,
        )
        .bind(update.id)
        .bind(update.global_virtual_group_id)
        .bind(update.stored_size as i64)
        .bind(update.update_at)
        .bind(&update.update_tx_hash)
        .bind(update.update_time)
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }
}

/// SQL migrations for the virtual-group module.
pub const MIGRATIONS: &[&str] = &[
    // Migration 0: the three virtual-group tables
    r#"
CREATE TABLE global_virtual_groups (
    id BIGINT PRIMARY KEY,
    family_id BIGINT NOT NULL DEFAULT 0,
    primary_sp_id BIGINT NOT NULL DEFAULT 0,
    secondary_sp_ids BIGINT[] NOT NULL DEFAULT '{}',
    stored_size BIGINT NOT NULL DEFAULT 0,
    virtual_payment_address TEXT NOT NULL DEFAULT '',
    total_deposit NUMERIC(78, 0) NOT NULL DEFAULT 0,
    removed BOOLEAN NOT NULL DEFAULT FALSE,
    create_at BIGINT NOT NULL DEFAULT 0,
    create_tx_hash TEXT NOT NULL DEFAULT '',
    create_time BIGINT NOT NULL DEFAULT 0,
    update_at BIGINT NOT NULL DEFAULT 0,
    update_tx_hash TEXT NOT NULL DEFAULT '',
    update_time BIGINT NOT NULL DEFAULT 0
);

CREATE INDEX idx_gvg_family ON global_virtual_groups(family_id);
CREATE INDEX idx_gvg_primary_sp ON global_virtual_groups(primary_sp_id);

CREATE TABLE global_virtual_group_families (
    id BIGINT PRIMARY KEY,
    primary_sp_id BIGINT NOT NULL DEFAULT 0,
    virtual_payment_address TEXT NOT NULL DEFAULT '',
    create_at BIGINT NOT NULL DEFAULT 0,
    create_tx_hash TEXT NOT NULL DEFAULT '',
    create_time BIGINT NOT NULL DEFAULT 0,
    update_at BIGINT NOT NULL DEFAULT 0,
    update_tx_hash TEXT NOT NULL DEFAULT '',
    update_time BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE local_virtual_groups (
    id BIGINT NOT NULL,
    global_virtual_group_id BIGINT NOT NULL DEFAULT 0,
    bucket_id NUMERIC(78, 0) NOT NULL DEFAULT 0,
    stored_size BIGINT NOT NULL DEFAULT 0,
    create_at BIGINT NOT NULL DEFAULT 0,
    create_tx_hash TEXT NOT NULL DEFAULT '',
    create_time BIGINT NOT NULL DEFAULT 0,
    update_at BIGINT NOT NULL DEFAULT 0,
    update_tx_hash TEXT NOT NULL DEFAULT '',
    update_time BIGINT NOT NULL DEFAULT 0,
    PRIMARY KEY (id, bucket_id)
);
"#,
];
