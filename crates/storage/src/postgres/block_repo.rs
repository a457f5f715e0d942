//! Block persistence for PostgreSQL.

use sqlx::PgPool;

use harbor_core::error::{StorageError, StorageResult};
use harbor_core::models::Block;

use super::database::Database;

/// Block-table operations.
pub struct PgBlockRepository {
    db: Database,
}

impl PgBlockRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn pool(&self) -> &PgPool {
        self.db.pool()
    }

    /// Insert a block. The height is the primary key and conflicting
    /// inserts are discarded, which is what makes height re-enqueue
    /// safe for the workers.
    pub async fn save_block(&self, block: &Block) -> StorageResult<()> {
        let _t = self.db.track("save_block");

        sqlx::query(
            r#"
            INSERT INTO blocks (height, hash, proposer_address, timestamp, num_txs, total_gas)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (height) DO NOTHING
            "#,
        )
        .bind(block.height as i64)
        .bind(&block.hash.0[..])
        .bind(&block.proposer.0[..])
        .bind(block.timestamp)
        .bind(block.tx_count as i32)
        .bind(block.total_gas as i64)
        .execute(self.pool())
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }

    pub async fn has_block(&self, height: u64) -> StorageResult<bool> {
        let _t = self.db.track("has_block");

        let row: (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM blocks WHERE height = $1)")
                .bind(height as i64)
                .fetch_one(self.pool())
                .await
                .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(row.0)
    }

    pub async fn last_block_height(&self) -> StorageResult<Option<u64>> {
        let _t = self.db.track("last_block_height");

        // MAX returns NULL when the table is empty.
        let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(height) FROM blocks")
            .fetch_one(self.pool())
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(row.0.map(|h| h as u64))
    }

    pub async fn total_blocks(&self) -> StorageResult<u64> {
        let _t = self.db.track("total_blocks");

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM blocks")
            .fetch_one(self.pool())
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(row.0 as u64)
    }

    /// Heights in `[from, to]` with no block row, ascending.
    pub async fn missing_heights(&self, from: u64, to: u64) -> StorageResult<Vec<u64>> {
        let _t = self.db.track("missing_heights");

        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"
            SELECT s.height
            FROM generate_series($1::BIGINT, $2::BIGINT) AS s(height)
            WHERE NOT EXISTS (SELECT 1 FROM blocks b WHERE b.height = s.height)
            ORDER BY s.height ASC
            "#,
        )
        .bind(from as i64)
        .bind(to as i64)
        .fetch_all(self.pool())
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(rows.into_iter().map(|(h,)| h as u64).collect())
    }
}
