//! Port trait for the engine-owned repository.
//!
//! The repository persists the canonical projection the ingestion
//! engine owns: blocks, transactions, messages, validators, commit
//! signatures, accounts and the epoch marker. Domain modules own
//! their tables through their own storage traits and never go
//! through this port. Implementations live in the infrastructure
//! layer (e.g. `harbor-storage`).

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::models::{
    Account, Block, CommitSignature, Epoch, Message, Transaction, Validator,
    ValidatorVotingPower,
};

/// Engine-owned persistence contract.
///
/// `save_block` is idempotent by height: a second write for an
/// existing height is discarded, which makes height re-enqueue safe.
#[async_trait]
pub trait Repository: Send + Sync {
    // -- blocks ------------------------------------------------------------

    /// Whether a block at this height is already present.
    async fn has_block(&self, height: u64) -> StorageResult<bool>;

    /// Persist a block. No-op when the height already exists.
    async fn save_block(&self, block: &Block) -> StorageResult<()>;

    /// Highest stored height, if any.
    async fn last_block_height(&self) -> StorageResult<Option<u64>>;

    /// Total number of stored blocks.
    async fn total_blocks(&self) -> StorageResult<u64>;

    /// Heights in `[from, to]` not yet present, ascending.
    async fn missing_heights(&self, from: u64, to: u64) -> StorageResult<Vec<u64>>;

    // -- transactions ------------------------------------------------------

    /// Persist a transaction. Idempotent by (height, tx_index).
    async fn save_tx(&self, tx: &Transaction) -> StorageResult<()>;

    /// Persist the decoded messages of a transaction.
    async fn save_messages(&self, messages: &[Message]) -> StorageResult<()>;

    // -- validators --------------------------------------------------------

    /// Write-through upsert of validators by consensus address.
    async fn save_validators(&self, validators: &[Validator]) -> StorageResult<()>;

    /// Write-through upsert of voting-power observations.
    async fn save_validator_voting_powers(
        &self,
        powers: &[ValidatorVotingPower],
    ) -> StorageResult<()>;

    /// Persist the commit signatures derived from a block's
    /// `last_commit`.
    async fn save_commit_signatures(&self, sigs: &[CommitSignature]) -> StorageResult<()>;

    // -- accounts ----------------------------------------------------------

    /// Upsert an account: `tx_count` is incremented, `last_active`
    /// takes the greater timestamp.
    async fn upsert_account(&self, account: &Account) -> StorageResult<()>;

    // -- epoch -------------------------------------------------------------

    /// Current epoch marker, if the row exists yet.
    async fn epoch(&self) -> StorageResult<Option<Epoch>>;

    /// Advance the epoch marker.
    async fn save_epoch(&self, epoch: &Epoch) -> StorageResult<()>;

    // -- lifecycle ---------------------------------------------------------

    /// Close the underlying connection pool.
    async fn close(&self);
}
