//! Epoch-marker persistence for PostgreSQL.

use harbor_core::error::{StorageError, StorageResult};
use harbor_core::models::{BlockHash, Epoch};

use super::database::Database;
use super::helpers::bytes_to_hash32;

/// Single-row epoch marker: the last fully processed block.
pub struct PgEpochRepository {
    db: Database,
}

impl PgEpochRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn epoch(&self) -> StorageResult<Option<Epoch>> {
        let _t = self.db.track("epoch");

        let row: Option<EpochRow> = sqlx::query_as(
            "SELECT height, block_hash, updated_at FROM epoch WHERE id = 1",
        )
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        row.map(EpochRow::into_epoch).transpose()
    }

    pub async fn save_epoch(&self, epoch: &Epoch) -> StorageResult<()> {
        let _t = self.db.track("save_epoch");

        sqlx::query(
            r#"
            INSERT INTO epoch (id, height, block_hash, updated_at)
            VALUES (1, $1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET
                height = EXCLUDED.height,
                block_hash = EXCLUDED.block_hash,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(epoch.height as i64)
        .bind(&epoch.block_hash.0[..])
        .bind(epoch.updated_at)
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct EpochRow {
    height: i64,
    block_hash: Vec<u8>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl EpochRow {
    fn into_epoch(self) -> StorageResult<Epoch> {
        Ok(Epoch {
            height: self.height as u64,
            block_hash: BlockHash(bytes_to_hash32(self.block_hash, "epoch.block_hash")?),
            updated_at: self.updated_at,
        })
    }
}
