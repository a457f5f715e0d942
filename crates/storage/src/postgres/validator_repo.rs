//! Validator, voting-power and commit-signature persistence.

use harbor_core::error::{StorageError, StorageResult};
use harbor_core::models::{CommitSignature, Validator, ValidatorVotingPower};

use super::database::Database;

/// Validator-table operations. Everything here is write-through:
/// whatever tuple is supplied is inserted or updated.
pub struct PgValidatorRepository {
    db: Database,
}

impl PgValidatorRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn save_validators(&self, validators: &[Validator]) -> StorageResult<()> {
        if validators.is_empty() {
            return Ok(());
        }
        let _t = self.db.track("save_validators");

        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        for validator in validators {
            sqlx::query(
                r#"
                INSERT INTO validators (cons_address, cons_pubkey)
                VALUES ($1, $2)
                ON CONFLICT (cons_address) DO UPDATE SET
                    cons_pubkey = EXCLUDED.cons_pubkey
                "#,
            )
            .bind(&validator.cons_address.0[..])
            .bind(&validator.cons_pubkey)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        Ok(())
    }

    pub async fn save_voting_powers(
        &self,
        powers: &[ValidatorVotingPower],
    ) -> StorageResult<()> {
        if powers.is_empty() {
            return Ok(());
        }
        let _t = self.db.track("save_validator_voting_powers");

        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        for power in powers {
            sqlx::query(
                r#"
                INSERT INTO validator_voting_powers (cons_address, voting_power, height)
                VALUES ($1, $2, $3)
                ON CONFLICT (cons_address, height) DO UPDATE SET
                    voting_power = EXCLUDED.voting_power
                "#,
            )
            .bind(&power.cons_address.0[..])
            .bind(power.voting_power)
            .bind(power.height as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::QueryError(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        Ok(())
    }

    pub async fn save_commit_signatures(&self, sigs: &[CommitSignature]) -> StorageResult<()> {
        if sigs.is_empty() {
            return Ok(());
        }
        let _t = self.db.track("save_commit_signatures");

        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        for sig in sigs {
            sqlx::query(
                r#"
                INSERT INTO commit_signatures (
                    validator_address, voting_power, proposer_priority, height, timestamp
                )
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (validator_address, height) DO NOTHING
                "#,
            )
            .bind(&sig.validator_address.0[..])
            .bind(sig.voting_power)
            .bind(sig.proposer_priority)
            .bind(sig.height as i64)
            .bind(sig.timestamp)
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
