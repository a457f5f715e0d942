//! Storage layer for the storage-provider module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use harbor_core::error::{StorageError, StorageResult};
use harbor_storage::Database;

/// A storage-provider row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageProvider {
    pub sp_id: i64,
    pub sp_address: String,
    pub funding_address: String,
    pub seal_address: String,
    pub approval_address: String,
    pub gc_address: String,
    pub endpoint: String,
    pub total_deposit: String,
    pub status: String,
    pub removed: bool,
    pub create_at: i64,
    pub create_tx_hash: String,
    pub create_time: i64,
    pub update_at: i64,
    pub update_tx_hash: String,
    pub update_time: i64,
}

/// Storage trait for storage-provider rows.
#[async_trait]
pub trait StorageProviderStorage: Send + Sync {
    async fn prepare_tables(&self) -> StorageResult<()>;
    async fn save_storage_provider(&self, sp: &StorageProvider) -> StorageResult<()>;
    async fn edit_storage_provider(
        &self,
        sp_id: i64,
        endpoint: &str,
        update_at: i64,
        update_tx_hash: &str,
        update_time: i64,
    ) -> StorageResult<()>;
}

/// PostgreSQL implementation of StorageProviderStorage.
pub struct PgStorageProviderStorage {
    db: Database,
}

impl PgStorageProviderStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StorageProviderStorage for PgStorageProviderStorage {
    async fn prepare_tables(&self) -> StorageResult<()> {
        self.db
            .run_module_migrations("storage_provider", MIGRATIONS)
            .await
    }

    async fn save_storage_provider(&self, sp: &StorageProvider) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO storage_providers (
                sp_id, sp_address, funding_address, seal_address, approval_address,
                gc_address, endpoint, total_deposit, status, removed,
                create_at, create_tx_hash, create_time,
                update_at, update_tx_hash, update_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8::NUMERIC, $9, FALSE,
                    $10, $11, $12, $13, $14, $15)
            ON CONFLICT (sp_id) DO UPDATE SET
                sp_address = CASE WHEN storage_providers.update_at > EXCLUDED.update_at
                                  THEN storage_providers.sp_address ELSE EXCLUDED.sp_address END,
                endpoint = CASE WHEN storage_providers.update_at > EXCLUDED.update_at
                                THEN storage_providers.endpoint ELSE EXCLUDED.endpoint END,
                total_deposit = CASE WHEN storage_providers.update_at > EXCLUDED.update_at
                                     THEN storage_providers.total_deposit ELSE EXCLUDED.total_deposit END,
                status = CASE WHEN storage_providers.update_at > EXCLUDED.update_at
                              THEN storage_providers.status ELSE EXCLUDED.status END,
                removed = CASE WHEN storage_providers.update_at > EXCLUDED.update_at
                               THEN storage_providers.removed ELSE FALSE END,
                create_at = EXCLUDED.create_at,
                create_tx_hash = EXCLUDED.create_tx_hash,
                create_time = EXCLUDED.create_time,
                update_tx_hash = CASE WHEN storage_providers.update_at > EXCLUDED.update_at
                                      THEN storage_providers.update_tx_hash
                                      ELSE EXCLUDED.update_tx_hash END,
                update_time = CASE WHEN storage_providers.update_at > EXCLUDED.update_at
                                   THEN storage_providers.update_time ELSE EXCLUDED.update_time END,
                update_at = GREATEST(storage_providers.update_at, EXCLUDED.update_at)
            "#,
        )
        .bind(sp.sp_id)
        .bind(&sp.sp_address)
        .bind(&sp.funding_address)
        .bind(&sp.seal_address)
        .bind(&sp.approval_address)
        .bind(&sp.gc_address)
        .bind(&sp.endpoint)
        .bind(&sp.total_deposit)
        .bind(&sp.status)
        .bind(sp.create_at)
        .bind(&sp.create_tx_hash)
        .bind(sp.create_time)
        .bind(sp.update_at)
        .bind(&sp.update_tx_hash)
        .bind(sp.update_time)
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }

    async fn edit_storage_provider(
        &self,
        sp_id: i64,
        endpoint: &str,
        update_at: i64,
        update_tx_hash: &str,
        update_time: i64,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            UPDATE storage_providers SET
                endpoint = $2, update_at = $3, update_tx_hash = $4, update_time = $5
            WHERE sp_id = $1 AND update_at <= $3
            "#,
        )
        .bind(sp_id)
        .bind(endpoint)
        .bind(update_at)
        .bind(update_tx_hash)
        .bind(update_time)
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }
}

/// SQL migrations for the storage-provider module.
pub const MIGRATIONS: &[&str] = &[
    // Migration 0: storage_providers table
    r#"
CREATE TABLE storage_providers (
    sp_id BIGINT PRIMARY KEY,
    sp_address TEXT NOT NULL DEFAULT '',
    funding_address TEXT NOT NULL DEFAULT '',
    seal_address TEXT NOT NULL DEFAULT '',
    approval_address TEXT NOT NULL DEFAULT '',
    gc_address TEXT NOT NULL DEFAULT '',
    endpoint TEXT NOT NULL DEFAULT '',
    total_deposit NUMERIC(78, 0) NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT '',
    removed BOOLEAN NOT NULL DEFAULT FALSE,
    create_at BIGINT NOT NULL DEFAULT 0,
    create_tx_hash TEXT NOT NULL DEFAULT '',
    create_time BIGINT NOT NULL DEFAULT 0,
    update_at BIGINT NOT NULL DEFAULT 0,
    update_tx_hash TEXT NOT NULL DEFAULT '',
    update_time BIGINT NOT NULL DEFAULT 0
);

CREATE INDEX idx_storage_providers_address ON storage_providers(sp_address);
"#,
];
