//! Storage layer for the bucket module.

use async_trait::async_trait;

use harbor_core::error::{StorageError, StorageResult};
use harbor_storage::Database;

use super::models::{Bucket, BucketRemoval, BucketUpdate};

/// Storage trait for bucket rows.
///
/// Upserts honor per-column last-write-by-height: a mutation from a
/// lower height never overwrites state written by a higher one, so
/// out-of-order workers converge. The tombstone in particular stays
/// set when a create event for an earlier height arrives after the
/// delete.
#[async_trait]
pub trait BucketStorage: Send + Sync {
    /// Create or migrate the module tables.
    async fn prepare_tables(&self) -> StorageResult<()>;

    /// Upsert a bucket from a create event.
    async fn save_bucket(&self, bucket: &Bucket) -> StorageResult<()>;

    /// Apply a bucket-info mutation.
    async fn update_bucket(&self, update: &BucketUpdate) -> StorageResult<()>;

    /// Mark a bucket removed.
    async fn remove_bucket(&self, removal: &BucketRemoval) -> StorageResult<()>;
}

/// PostgreSQL implementation of BucketStorage.
pub struct PgBucketStorage {
    db: Database,
}

impl PgBucketStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl BucketStorage for PgBucketStorage {
    async fn prepare_tables(&self) -> StorageResult<()> {
        self.db.run_module_migrations("bucket", MIGRATIONS).await
    }

    async fn save_bucket(&self, bucket: &Bucket) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO buckets (
                bucket_id, bucket_name, owner, payment_address, visibility, status,
                charged_read_quota, primary_sp_id, global_virtual_group_family_id,
                removed, create_at, create_tx_hash, create_time,
                update_at, update_tx_hash, update_time
            )
            VALUES ($1::NUMERIC, $2, $3, $4, $5, $6, $7, $8, $9, FALSE, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (bucket_id) DO UPDATE SET
                bucket_name = CASE WHEN buckets.update_at > EXCLUDED.update_at
                                   THEN buckets.bucket_name ELSE EXCLUDED.bucket_name END,
                owner = CASE WHEN buckets.update_at > EXCLUDED.update_at
                             THEN buckets.owner ELSE EXCLUDED.owner END,
                payment_address = CASE WHEN buckets.update_at > EXCLUDED.update_at
                                       THEN buckets.payment_address ELSE EXCLUDED.payment_address END,
                visibility = CASE WHEN buckets.update_at > EXCLUDED.update_at
                                  THEN buckets.visibility ELSE EXCLUDED.visibility END,
                status = CASE WHEN buckets.update_at > EXCLUDED.update_at
                              THEN buckets.status ELSE EXCLUDED.status END,
                charged_read_quota = CASE WHEN buckets.update_at > EXCLUDED.update_at
                                          THEN buckets.charged_read_quota ELSE EXCLUDED.charged_read_quota END,
                primary_sp_id = CASE WHEN buckets.update_at > EXCLUDED.update_at
                                     THEN buckets.primary_sp_id ELSE EXCLUDED.primary_sp_id END,
                global_virtual_group_family_id = CASE WHEN buckets.update_at > EXCLUDED.update_at
                                     THEN buckets.global_virtual_group_family_id
                                     ELSE EXCLUDED.global_virtual_group_family_id END,
                -- a re-create clears the tombstone only when it is the
                -- latest write for this bucket
                removed = CASE WHEN buckets.update_at > EXCLUDED.update_at
                               THEN buckets.removed ELSE FALSE END,
                create_at = EXCLUDED.create_at,
                create_tx_hash = EXCLUDED.create_tx_hash,
                create_time = EXCLUDED.create_time,
                update_tx_hash = CASE WHEN buckets.update_at > EXCLUDED.update_at
                                      THEN buckets.update_tx_hash ELSE EXCLUDED.update_tx_hash END,
                update_time = CASE WHEN buckets.update_at > EXCLUDED.update_at
                                   THEN buckets.update_time ELSE EXCLUDED.update_time END,
                update_at = GREATEST(buckets.update_at, EXCLUDED.update_at)
            "#,
        )
        .bind(&bucket.bucket_id)
        .bind(&bucket.bucket_name)
        .bind(&bucket.owner)
        .bind(&bucket.payment_address)
        .bind(&bucket.visibility)
        .bind(&bucket.status)
        .bind(bucket.charged_read_quota as i64)
        .bind(bucket.primary_sp_id)
        .bind(bucket.global_virtual_group_family_id)
        .bind(bucket.create_at)
        .bind(&bucket.create_tx_hash)
        .bind(bucket.create_time)
        .bind(bucket.update_at)
        .bind(&bucket.update_tx_hash)
        .bind(bucket.update_time)
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }

    async fn update_bucket(&self, update: &BucketUpdate) -> StorageResult<()> {
        sqlx::query(
            r#"
            UPDATE buckets SET
                charged_read_quota = $2,
                payment_address = $3,
                visibility = $4,
                update_at = $5,
                update_tx_hash = $6,
                update_time = $7
            WHERE bucket_id = $1::NUMERIC AND update_at <= $5
            "#,
        )
        .bind(&update.bucket_id)
        .bind(update.charged_read_quota as i64)
        .bind(&update.payment_address)
        .bind(&update.visibility)
        .bind(update.update_at)
        .bind(&update.update_tx_hash)
        .bind(update.update_time)
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }

    async fn remove_bucket(&self, removal: &BucketRemoval) -> StorageResult<()> {
        // Insert a tombstone-only row when the create has not been
        // seen yet (out-of-order workers).
        sqlx::query(
            r#"
            INSERT INTO buckets (
                bucket_id, bucket_name, owner, payment_address, visibility, status,
                charged_read_quota, primary_sp_id, global_virtual_group_family_id,
                removed, create_at, create_tx_hash, create_time,
                update_at, update_tx_hash, update_time
            )
            VALUES ($1::NUMERIC, '', '', '', '', '', 0, 0, 0, TRUE, $2, $3, $4, $2, $3, $4)
            ON CONFLICT (bucket_id) DO UPDATE SET
                removed = CASE WHEN buckets.update_at > EXCLUDED.update_at
                               THEN buckets.removed ELSE TRUE END,
                update_tx_hash = CASE WHEN buckets.update_at > EXCLUDED.update_at
                                      THEN buckets.update_tx_hash ELSE EXCLUDED.update_tx_hash END,
                update_time = CASE WHEN buckets.update_at > EXCLUDED.update_at
                                   THEN buckets.update_time ELSE EXCLUDED.update_time END,
                update_at = GREATEST(buckets.update_at, EXCLUDED.update_at)
            "#,
        )
        .bind(&removal.bucket_id)
        .bind(removal.update_at)
        .bind(&removal.update_tx_hash)
        .bind(removal.update_time)
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }
}

/// SQL migrations for the bucket module.
/// Each migration is tracked and only executed once.
pub const MIGRATIONS: &[&str] = &[
    // Migration 0: buckets table
    r#"
CREATE TABLE buckets (
    bucket_id NUMERIC(78, 0) PRIMARY KEY,
    bucket_name TEXT NOT NULL,
    owner TEXT NOT NULL,
    payment_address TEXT NOT NULL DEFAULT '',
    visibility TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT '',
    charged_read_quota BIGINT NOT NULL DEFAULT 0,
    primary_sp_id BIGINT NOT NULL DEFAULT 0,
    global_virtual_group_family_id BIGINT NOT NULL DEFAULT 0,
    removed BOOLEAN NOT NULL DEFAULT FALSE,
    create_at BIGINT NOT NULL DEFAULT 0,
    create_tx_hash TEXT NOT NULL DEFAULT '',
    create_time BIGINT NOT NULL DEFAULT 0,
    update_at BIGINT NOT NULL DEFAULT 0,
    update_tx_hash TEXT NOT NULL DEFAULT '',
    update_time BIGINT NOT NULL DEFAULT 0
);

CREATE INDEX idx_buckets_name ON buckets(bucket_name);
CREATE INDEX idx_buckets_owner ON buckets(owner);
"#,
];
