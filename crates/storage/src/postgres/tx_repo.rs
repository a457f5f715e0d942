//! Transaction and message persistence for PostgreSQL.

use harbor_core::error::{StorageError, StorageResult};
use harbor_core::models::{Message, Transaction};

use super::database::Database;

/// Tx- and message-table operations.
pub struct PgTxRepository {
    db: Database,
}

impl PgTxRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a transaction. Idempotent by (height, tx_index).
    pub async fn save_tx(&self, tx: &Transaction) -> StorageResult<()> {
        let _t = self.db.track("save_tx");

        sqlx::query(
            r#"
            INSERT INTO txs (
                hash, height, tx_index, success, messages, memo, signatures,
                signer_infos, fee, gas_wanted, gas_used, raw_log, logs
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (height, tx_index) DO NOTHING
            "#,
        )
        .bind(&tx.hash.0[..])
        .bind(tx.height as i64)
        .bind(tx.tx_index as i32)
        .bind(tx.success)
        .bind(&tx.messages)
        .bind(&tx.memo)
        .bind(&tx.signatures)
        .bind(&tx.signer_infos)
        .bind(&tx.fee)
        .bind(tx.gas_wanted as i64)
        .bind(tx.gas_used as i64)
        .bind(&tx.raw_log)
        .bind(&tx.logs)
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }

    /// Insert the decoded messages of a transaction in one go.
    pub async fn save_messages(&self, messages: &[Message]) -> StorageResult<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let _t = self.db.track("save_messages");

        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        for message in messages {
            sqlx::query(
                r#"
                INSERT INTO messages (
                    tx_hash, msg_index, type_url, value, involved_addresses, height
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (tx_hash, msg_index) DO NOTHING
                "#,
            )
            .bind(&message.tx_hash.0[..])
            .bind(message.index as i32)
            .bind(&message.type_url)
            .bind(&message.value)
            .bind(&message.involved_addresses)
            .bind(message.height as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        Ok(())
    }
}
