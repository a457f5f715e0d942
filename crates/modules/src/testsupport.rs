//! Shared fixtures for module tests.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use harbor_core::error::StorageResult;
use harbor_core::models::{
    Account, Block, BlockHash, CommitSignature, Epoch, Message, Transaction, TxHash, Validator,
    ValidatorVotingPower,
};
use harbor_core::ports::{Event, EventAttribute, EventContext, Repository};

/// Event context at a height, with a deterministic tx hash and time.
pub fn ctx_at(height: u64) -> EventContext {
    EventContext {
        height,
        block_hash: BlockHash([height as u8; 32]),
        timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        tx_hash: Some(TxHash([0xcc; 32])),
    }
}

/// Build an event from (key, value) attribute pairs.
pub fn event_with(type_url: &str, attrs: &[(&str, &str)]) -> Event {
    Event {
        type_url: type_url.to_string(),
        attributes: attrs
            .iter()
            .map(|(k, v)| EventAttribute {
                key: k.to_string(),
                value: v.to_string(),
            })
            .collect(),
    }
}

/// Repository stub: everything is a no-op except the epoch row.
#[derive(Default)]
pub struct NullRepository {
    epoch_height: Option<u64>,
}

impl NullRepository {
    pub fn with_epoch_height(height: u64) -> Self {
        Self {
            epoch_height: Some(height),
        }
    }
}

#[async_trait]
impl Repository for NullRepository {
    async fn has_block(&self, _height: u64) -> StorageResult<bool> {
        Ok(false)
    }
    async fn save_block(&self, _block: &Block) -> StorageResult<()> {
        Ok(())
    }
    async fn last_block_height(&self) -> StorageResult<Option<u64>> {
        Ok(None)
    }
    async fn total_blocks(&self) -> StorageResult<u64> {
        Ok(0)
    }
    async fn missing_heights(&self, _from: u64, _to: u64) -> StorageResult<Vec<u64>> {
        Ok(vec![])
    }
    async fn save_tx(&self, _tx: &Transaction) -> StorageResult<()> {
        Ok(())
    }
    async fn save_messages(&self, _messages: &[Message]) -> StorageResult<()> {
        Ok(())
    }
    async fn save_validators(&self, _validators: &[Validator]) -> StorageResult<()> {
        Ok(())
    }
    async fn save_validator_voting_powers(
        &self,
        _powers: &[ValidatorVotingPower],
    ) -> StorageResult<()> {
        Ok(())
    }
    async fn save_commit_signatures(&self, _sigs: &[CommitSignature]) -> StorageResult<()> {
        Ok(())
    }
    async fn upsert_account(&self, _account: &Account) -> StorageResult<()> {
        Ok(())
    }
    async fn epoch(&self) -> StorageResult<Option<Epoch>> {
        Ok(self.epoch_height.map(|height| Epoch {
            height,
            block_hash: BlockHash([0; 32]),
            updated_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }))
    }
    async fn save_epoch(&self, _epoch: &Epoch) -> StorageResult<()> {
        Ok(())
    }
    async fn close(&self) {}
}
