//! Storage layer for the payment module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use harbor_core::error::{StorageError, StorageResult};
use harbor_storage::Database;

/// A payment stream record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamRecord {
    pub account: String,
    pub crud_timestamp: i64,
    /// Flow rates and balances exceed u64; kept as decimal strings.
    pub netflow_rate: String,
    pub static_balance: String,
    pub buffer_balance: String,
    pub lock_balance: String,
    pub status: String,
    pub settle_timestamp: i64,
    pub update_at: i64,
    pub update_time: i64,
}

/// A payment account row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAccount {
    pub addr: String,
    pub owner: String,
    pub refundable: bool,
    pub update_at: i64,
    pub update_time: i64,
}

/// Storage trait for payment rows.
#[async_trait]
pub trait PaymentStorage: Send + Sync {
    async fn prepare_tables(&self) -> StorageResult<()>;
    async fn save_stream_record(&self, record: &StreamRecord) -> StorageResult<()>;
    async fn save_payment_account(&self, account: &PaymentAccount) -> StorageResult<()>;

    /// Flag stream records whose settle timestamp has passed; returns
    /// how many rows flipped. Driven by the module's periodic job.
    async fn settle_due_stream_records(&self, now_ts: i64) -> StorageResult<u64>;
}

/// PostgreSQL implementation of PaymentStorage.
pub struct PgPaymentStorage {
    db: Database,
}

impl PgPaymentStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PaymentStorage for PgPaymentStorage {
    async fn prepare_tables(&self) -> StorageResult<()> {
        self.db.run_module_migrations("payment", MIGRATIONS).await
    }

    async fn save_stream_record(&self, record: &StreamRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stream_records (
                account, crud_timestamp, netflow_rate, static_balance,
                buffer_balance, lock_balance, status, settle_timestamp,
                update_at, update_time
            )
            VALUES ($1, $2, $3::NUMERIC, $4::NUMERIC, $5::NUMERIC, $6::NUMERIC, $7, $8, $9, $10)
            ON CONFLICT (account) DO UPDATE SET
                crud_timestamp = EXCLUDED.crud_timestamp,
                netflow_rate = EXCLUDED.netflow_rate,
                static_balance = EXCLUDED.static_balance,
                buffer_balance = EXCLUDED.buffer_balance,
                lock_balance = EXCLUDED.lock_balance,
                status = EXCLUDED.status,
                settle_timestamp = EXCLUDED.settle_timestamp,
                update_at = EXCLUDED.update_at,
                update_time = EXCLUDED.update_time
            WHERE stream_records.update_at <= EXCLUDED.update_at
            "#,
        )
        .bind(&record.account)
        .bind(record.crud_timestamp)
        .bind(&record.netflow_rate)
        .bind(&record.static_balance)
        .bind(&record.buffer_balance)
        .bind(&record.lock_balance)
        .bind(&record.status)
        .bind(record.settle_timestamp)
        .bind(record.update_at)
        .bind(record.update_time)
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }

    async fn save_payment_account(&self, account: &PaymentAccount) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_accounts (addr, owner, refundable, update_at, update_time)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (addr) DO UPDATE SET
                owner = EXCLUDED.owner,
                refundable = EXCLUDED.refundable,
                update_at = EXCLUDED.update_at,
                update_time = EXCLUDED.update_time
            WHERE payment_accounts.update_at <= EXCLUDED.update_at
            "#,
        )
        .bind(&account.addr)
        .bind(&account.owner)
        .bind(account.refundable)
        .bind(account.update_at)
        .bind(account.update_time)
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }

    async fn settle_due_stream_records(&self, now_ts: i64) -> StorageResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE stream_records
            SET status = 'STREAM_ACCOUNT_STATUS_SETTLING'
            WHERE settle_timestamp > 0
              AND settle_timestamp <= $1
              AND status = 'STREAM_ACCOUNT_STATUS_ACTIVE'
            "#,
        )
        .bind(now_ts)
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

/// SQL migrations for the payment module.
pub const MIGRATIONS: &[&str] = &[
    // Migration 0: stream records and payment accounts
    r#"
CREATE TABLE stream_records (
    account TEXT PRIMARY KEY,
    crud_timestamp BIGINT NOT NULL DEFAULT 0,
    netflow_rate NUMERIC(78, 0) NOT NULL DEFAULT 0,
    static_balance NUMERIC(78, 0) NOT NULL DEFAULT 0,
    buffer_balance NUMERIC(78, 0) NOT NULL DEFAULT 0,
    lock_balance NUMERIC(78, 0) NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT '',
    settle_timestamp BIGINT NOT NULL DEFAULT 0,
    update_at BIGINT NOT NULL DEFAULT 0,
    update_time BIGINT NOT NULL DEFAULT 0
);

CREATE INDEX idx_stream_records_settle ON stream_records(settle_timestamp);

CREATE TABLE payment_accounts (
    addr TEXT PRIMARY KEY,
    owner TEXT NOT NULL DEFAULT '',
    refundable BOOLEAN NOT NULL DEFAULT TRUE,
    update_at BIGINT NOT NULL DEFAULT 0,
    update_time BIGINT NOT NULL DEFAULT 0
);

CREATE INDEX idx_payment_accounts_owner ON payment_accounts(owner);
"#,
];
