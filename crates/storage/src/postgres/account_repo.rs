//! Account persistence for PostgreSQL.

use harbor_core::error::{StorageError, StorageResult};
use harbor_core::models::Account;

use super::database::Database;

/// Account-table operations.
pub struct PgAccountRepository {
    db: Database,
}

impl PgAccountRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Upsert an account observed in a tx log: the tx counter is
    /// incremented and `last_active` keeps the greater timestamp so
    /// out-of-order workers converge.
    pub async fn upsert_account(&self, account: &Account) -> StorageResult<()> {
        let _t = self.db.track("upsert_account");

        sqlx::query(
            r#"
            INSERT INTO accounts (address, tx_count, last_active)
            VALUES ($1, 1, $2)
            ON CONFLICT (address) DO UPDATE SET
                tx_count = accounts.tx_count + 1,
                last_active = GREATEST(accounts.last_active, EXCLUDED.last_active)
            "#,
        )
        .bind(&account.address.0[..])
        .bind(account.last_active)
        .execute(self.db.pool())
        .await
        .map_err(|e| StorageError::QueryError(e.to_string()))?;

        Ok(())
    }
}
