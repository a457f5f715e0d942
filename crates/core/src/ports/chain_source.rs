//! Port trait for the chain node data source.
//!
//! This trait defines the interface for fetching blocks, results,
//! transactions and validators by height, and for subscribing to
//! new-block notifications. Implementations live in the
//! infrastructure layer (e.g. `harbor-chain`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::pin::Pin;

use crate::error::ChainResult;
use crate::models::{GenesisDoc, TxHash};

/// A block as returned by the node, before domain transformation.
#[derive(Debug, Clone)]
pub struct ChainBlock {
    /// Block height.
    pub height: u64,
    /// Block hash.
    pub hash: [u8; 32],
    /// Consensus address of the proposer.
    pub proposer_address: [u8; 20],
    /// Block timestamp.
    pub time: DateTime<Utc>,
    /// Number of transactions carried by the block.
    pub tx_count: u32,
    /// Pre-commit votes for the previous block.
    pub last_commit: Vec<RawCommitVote>,
}

/// One vote inside a block's `last_commit`.
#[derive(Debug, Clone)]
pub struct RawCommitVote {
    /// Consensus address of the signer.
    pub validator_address: [u8; 20],
    /// Vote timestamp.
    pub timestamp: DateTime<Utc>,
    /// Raw signature; `None` for absent votes, which are skipped.
    pub signature: Option<Vec<u8>>,
}

/// Execution results for every transaction of a block.
#[derive(Debug, Clone)]
pub struct BlockResults {
    pub height: u64,
    pub tx_results: Vec<TxResult>,
    /// Events emitted outside any transaction (begin/end block).
    pub block_events: Vec<Event>,
}

/// Execution result of a single transaction.
#[derive(Debug, Clone)]
pub struct TxResult {
    /// Result code; 0 means success.
    pub code: u32,
    pub gas_wanted: u64,
    pub gas_used: u64,
    /// Hash of the transaction, when the adapter can compute it.
    pub tx_hash: Option<TxHash>,
    pub events: Vec<Event>,
}

impl TxResult {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// A full transaction as returned by the node.
#[derive(Debug, Clone)]
pub struct ChainTx {
    pub hash: [u8; 32],
    pub height: u64,
    /// Index within the block (0-based).
    pub index: u32,
    pub success: bool,
    /// Messages as a canonical JSON array; each element carries a
    /// `@type` discriminator.
    pub messages: serde_json::Value,
    pub memo: String,
    pub signatures: Vec<String>,
    pub signer_infos: serde_json::Value,
    pub fee: serde_json::Value,
    pub gas_wanted: u64,
    pub gas_used: u64,
    pub raw_log: String,
    /// Structured logs: one entry per message, each with its events.
    pub logs: serde_json::Value,
}

/// An event emitted during block execution, identified by its
/// fully-qualified type URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Fully-qualified type URL
    /// (e.g. `bnbchain.greenfield.storage.EventCreateBucket`).
    pub type_url: String,
    pub attributes: Vec<EventAttribute>,
}

/// One key/value attribute of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventAttribute {
    pub key: String,
    pub value: String,
}

impl Event {
    /// Look up an attribute by key.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.value.as_str())
    }
}

/// A validator as listed in a height's validator set.
#[derive(Debug, Clone)]
pub struct ValidatorSetEntry {
    pub address: [u8; 20],
    /// Consensus public key (base64).
    pub pub_key: String,
    pub voting_power: i64,
    pub proposer_priority: i64,
}

/// Notification that a new block was finalized at the tip.
#[derive(Debug, Clone)]
pub struct NewBlockNotice {
    pub height: u64,
}

/// Stream of new-block notifications.
pub type NewBlockStream = Pin<Box<dyn Stream<Item = ChainResult<NewBlockNotice>> + Send>>;

/// Port trait for the chain node.
///
/// All calls are height-driven; the adapter owns per-call timeouts
/// (3s for block/block-results, 5s for subscription setup).
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Identifier of the connected chain.
    async fn chain_id(&self) -> ChainResult<String>;

    /// Current tip height.
    async fn latest_height(&self) -> ChainResult<u64>;

    /// Fetch the block at a height.
    async fn block(&self, height: u64) -> ChainResult<ChainBlock>;

    /// Fetch execution results for a height.
    async fn block_results(&self, height: u64) -> ChainResult<BlockResults>;

    /// Fetch the full transactions of a block.
    async fn txs(&self, block: &ChainBlock) -> ChainResult<Vec<ChainTx>>;

    /// Fetch the validator set at a height.
    async fn validators(&self, height: u64) -> ChainResult<Vec<ValidatorSetEntry>>;

    /// Subscribe to new-block notifications at the tip.
    async fn subscribe_new_blocks(&self) -> ChainResult<NewBlockStream>;

    /// Fetch the genesis document. Adapters fall back to the chunked
    /// genesis API when the node refuses the single-shot call.
    async fn genesis(&self) -> ChainResult<GenesisDoc>;
}
