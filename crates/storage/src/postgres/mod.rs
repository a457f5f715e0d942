//! PostgreSQL storage adapter.
//!
//! This module implements the `Repository` port defined in
//! `harbor-core` using PostgreSQL as the backing store.
//!
//! # Architecture
//!
//! - [`Database`] - Connection pool, engine migrations, module
//!   migration tracking, slow-query surfacing
//! - [`PgRepository`] - Composite repository implementing the
//!   `Repository` trait
//! - Individual repos: blocks, txs, validators, accounts, epoch
//!
//! # Usage
//!
//! ```ignore
//! let db = Database::connect(&config).await?;
//! db.migrate().await?;
//!
//! let repository = Arc::new(PgRepository::new(db));
//! ```

mod account_repo;
mod block_repo;
mod database;
mod epoch_repo;
mod helpers;
mod tx_repo;
mod validator_repo;

pub use account_repo::PgAccountRepository;
pub use block_repo::PgBlockRepository;
pub use database::{Database, DatabaseConfig};
pub use epoch_repo::PgEpochRepository;
pub use tx_repo::PgTxRepository;
pub use validator_repo::PgValidatorRepository;

use async_trait::async_trait;

use harbor_core::error::StorageResult;
use harbor_core::models::{
    Account, Block, CommitSignature, Epoch, Message, Transaction, Validator,
    ValidatorVotingPower,
};
use harbor_core::ports::Repository;

// =============================================================================
// Composite Repository
// =============================================================================

/// Aggregated PostgreSQL repositories implementing the `Repository`
/// port. This is the single entry point the ingestion engine holds.
pub struct PgRepository {
    db: Database,
    blocks: PgBlockRepository,
    txs: PgTxRepository,
    validators: PgValidatorRepository,
    accounts: PgAccountRepository,
    epoch: PgEpochRepository,
}

impl PgRepository {
    pub fn new(db: Database) -> Self {
        Self {
            blocks: PgBlockRepository::new(db.clone()),
            txs: PgTxRepository::new(db.clone()),
            validators: PgValidatorRepository::new(db.clone()),
            accounts: PgAccountRepository::new(db.clone()),
            epoch: PgEpochRepository::new(db.clone()),
            db,
        }
    }

    /// The underlying database handle, used to wire module storages.
    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn has_block(&self, height: u64) -> StorageResult<bool> {
        self.blocks.has_block(height).await
    }

    async fn save_block(&self, block: &Block) -> StorageResult<()> {
        self.blocks.save_block(block).await
    }

    async fn last_block_height(&self) -> StorageResult<Option<u64>> {
        self.blocks.last_block_height().await
    }

    async fn total_blocks(&self) -> StorageResult<u64> {
        self.blocks.total_blocks().await
    }

    async fn missing_heights(&self, from: u64, to: u64) -> StorageResult<Vec<u64>> {
        self.blocks.missing_heights(from, to).await
    }

    async fn save_tx(&self, tx: &Transaction) -> StorageResult<()> {
        self.txs.save_tx(tx).await
    }

    async fn save_messages(&self, messages: &[Message]) -> StorageResult<()> {
        self.txs.save_messages(messages).await
    }

    async fn save_validators(&self, validators: &[Validator]) -> StorageResult<()> {
        self.validators.save_validators(validators).await
    }

    async fn save_validator_voting_powers(
        &self,
        powers: &[ValidatorVotingPower],
    ) -> StorageResult<()> {
        self.validators.save_voting_powers(powers).await
    }

    async fn save_commit_signatures(&self, sigs: &[CommitSignature]) -> StorageResult<()> {
        self.validators.save_commit_signatures(sigs).await
    }

    async fn upsert_account(&self, account: &Account) -> StorageResult<()> {
        self.accounts.upsert_account(account).await
    }

    async fn epoch(&self) -> StorageResult<Option<Epoch>> {
        self.epoch.epoch().await
    }

    async fn save_epoch(&self, epoch: &Epoch) -> StorageResult<()> {
        self.epoch.save_epoch(epoch).await
    }

    async fn close(&self) {
        self.db.close().await;
    }
}
