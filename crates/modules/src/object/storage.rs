//! Storage layer for the object module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use harbor_core::error::{StorageError, StorageResult};
use harbor_storage::Database;

/// A storage-object row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageObject {
    /// On-chain object id (decimal, may exceed u64).
    pub object_id: String,
    pub object_name: String,
    pub bucket_id: String,
    pub bucket_name: String,
    pub owner: String,
    pub creator: String,
    pub payload_size: u64,
    pub visibility: String,
    pub content_type: String,
    pub status: String,
    pub local_virtual_group_id: i64,
    pub global_virtual_group_id: i64,
    pub removed: bool,
    pub create_at: i64,
    pub create_tx_hash: String,
    pub create_time: i64,
    pub update_at: i64,
    pub update_tx_hash: String,
    pub update_time: i64,
}

/// Status transition applied when an object is sealed.
#[derive(Debug, Clone)]
pub struct ObjectSeal {
    pub object_id: String,
    pub status: String,
    pub global_virtual_group_id: i64,
    pub update_at: i64,
    pub update_tx_hash: String,
    pub update_time: i64,
}

/// Tombstone for a deleted or cancelled object.
#[derive(Debug, Clone)]
pub struct ObjectRemoval {
    pub object_id: String,
    pub status: String,
    pub update_at: i64,
    pub update_tx_hash: String,
    pub update_time: i64,
}

/// Storage trait for object rows. Same last-write-by-height contract
/// as the bucket storage.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn prepare_tables(&self) -> StorageResult<()>;
    async fn save_object(&self, object: &StorageObject) -> StorageResult<()>;
    async fn seal_object(&self, seal: &ObjectSeal) -> StorageResult<()>;
    async fn remove_object(&self, removal: &ObjectRemoval) -> StorageResult<()>;
}

/// PostgreSQL implementation of ObjectStorage.
pub struct PgObjectStorage {
    db: Database,
}

impl PgObjectStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ObjectStorage for PgObjectStorage {
    async fn prepare_tables(&self) -> StorageResult<()> {
        self.db.run_module_migrations("object", MIGRATIONS).await
    }

    async fn save_object(&self, object: &StorageObject) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO objects (
                object_id, object_name, bucket_id, bucket_name, owner, creator,
                payload_size, visibility, content_type, status,
                local_virtual_group_id, global_virtual_group_id, removed,
                create_at, create_tx_hash, create_time,
                update_at, update_tx_hash, update_time
            )
            VALUES ($1::NUMERIC, $2, $3::NUMERIC, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, FALSE, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (object_id) DO UPDATE SET
                object_name = CASE WHEN objects.update_at > EXCLUDED.update_at
                                   THEN objects.object_name ELSE EXCLUDED.object_name END,
                owner = CASE WHEN objects.update_at > EXCLUDED.update_at
                             THEN objects.owner ELSE EXCLUDED.owner END,
                status = CASE WHEN objects.update_at > EXCLUDED.update_at
                              THEN objects.status ELSE EXCLUDED.status END,
                payload_size = CASE WHEN objects.update_at > EXCLUDED.update_at
                                    THEN objects.payload_size ELSE EXCLUDED.payload_size END,
                removed = CASE WHEN objects.update_at > EXCLUDED.update_at
                               THEN objects.removed ELSE FALSE END,
                create_at = EXCLUDED.create_at,
                create_tx_hash = EXCLUDED.create_tx_hash,
                create_time = EXCLUDED.create_time,
                update_tx_hash = CASE WHEN objects.update_at > EXCLUDED.update_at
                                      THEN objects.update_tx_hash ELSE EXCLUDED.update_tx_hash END,
                update_time = CASE WHEN objects.update_at > EXCLUDED.update_at
                                   THEN objects.update_time ELSE EXCLUDED.update_time END,
                update_at = GREATEST(objects.update_at, EXCLUDED.update_at)
            "#,
        )
        .bind(&object.object_id)
        .bind(&object.object_name)
        .bind(&object.bucket_id)
        .bind(&object.bucket_name)
        .bind(&object.owner)
        .bind(&object.creator)
        .bind(object.payload_size as i64)
        .bind(&object.visibility)
        .bind(&object.content_type)
        .bind(&object.status)
        .bind(object.local_virtual_group_id)
        .bind(object.global_virtual_group_id)
        .bind(object.create_at)
        .bind(&object.create_tx_hash)
        .bind(object.create_time)
        .bind(object.update_at)
        .bind(&object.update_tx_hash)
        .bind(object.update_time)
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }

    async fn seal_object(&self, seal: &ObjectSeal) -> StorageResult<()> {
        sqlx::query(
            r#"
            UPDATE objects SET
                status = $2,
                global_virtual_group_id = $3,
                update_at = $4,
                update_tx_hash = $5,
                update_time = $6
            WHERE object_id = $1::NUMERIC AND update_at <= $4
            "#,
        )
        .bind(&seal.object_id)
        .bind(&seal.status)
        .bind(seal.global_virtual_group_id)
        .bind(seal.update_at)
        .bind(&seal.update_tx_hash)
        .bind(seal.update_time)
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }

    async fn remove_object(&self, removal: &ObjectRemoval) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO objects (
                object_id, object_name, bucket_id, bucket_name, owner, creator,
                payload_size, visibility, content_type, status,
                local_virtual_group_id, global_virtual_group_id, removed,
                create_at, create_tx_hash, create_time,
                update_at, update_tx_hash, update_time
            )
            VALUES ($1::NUMERIC, '', 0, '', '', '', 0, '', '', $2,
                    0, 0, TRUE, $3, $4, $5, $3, $4, $5)
            ON CONFLICT (object_id) DO UPDATE SET
                status = CASE WHEN objects.update_at > EXCLUDED.update_at
                              THEN objects.status ELSE EXCLUDED.status END,
                removed = CASE WHEN objects.update_at > EXCLUDED.update_at
                               THEN objects.removed ELSE TRUE END,
                update_tx_hash = CASE WHEN objects.update_at > EXCLUDED.update_at
                                      THEN objects.update_tx_hash ELSE EXCLUDED.update_tx_hash END,
                update_time = CASE WHEN objects.update_at > EXCLUDED.update_at
                                   THEN objects.update_time ELSE EXCLUDED.update_time END,
                update_at = GREATEST(objects.update_at, EXCLUDED.update_at)
            "#,
        )
        .bind(&removal.object_id)
        .bind(&removal.status)
        .bind(removal.update_at)
        .bind(&removal.update_tx_hash)
        .bind(removal.update_time)
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }
}

/// SQL migrations for the object module.
pub const MIGRATIONS: &[&str] = &[
    // Migration 0: objects table
    r#"
CREATE TABLE objects (
    object_id NUMERIC(78, 0) PRIMARY KEY,
    object_name TEXT NOT NULL,
    bucket_id NUMERIC(78, 0) NOT NULL DEFAULT 0,
    bucket_name TEXT NOT NULL DEFAULT '',
    owner TEXT NOT NULL DEFAULT '',
    creator TEXT NOT NULL DEFAULT '',
    payload_size BIGINT NOT NULL DEFAULT 0,
    visibility TEXT NOT NULL DEFAULT '',
    content_type TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT '',
    local_virtual_group_id BIGINT NOT NULL DEFAULT 0,
    global_virtual_group_id BIGINT NOT NULL DEFAULT 0,
    removed BOOLEAN NOT NULL DEFAULT FALSE,
    create_at BIGINT NOT NULL DEFAULT 0,
    create_tx_hash TEXT NOT NULL DEFAULT '',
    create_time BIGINT NOT NULL DEFAULT 0,
    update_at BIGINT NOT NULL DEFAULT 0,
    update_tx_hash TEXT NOT NULL DEFAULT '',
    update_time BIGINT NOT NULL DEFAULT 0
);

CREATE INDEX idx_objects_bucket_name ON objects(bucket_name);
CREATE INDEX idx_objects_name ON objects(object_name);
CREATE INDEX idx_objects_owner ON objects(owner);
"#,
];
