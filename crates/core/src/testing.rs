//! In-memory fakes shared by the service tests.
//!
//! The fakes model the repository's contract faithfully where the
//! engine relies on it: `save_block` is idempotent by height,
//! `upsert_account` increments the tx counter, `missing_heights`
//! scans the closed range.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;

use crate::config::ParsingConfig;
use crate::error::{ChainError, ChainResult, IndexerError, IndexerResult, StorageResult};
use crate::models::{
    AccAddress, Account, Block, CommitSignature, Epoch, GenesisDoc, Message, Transaction,
    Validator, ValidatorVotingPower,
};
use crate::ports::{
    BlockResults, ChainBlock, ChainSource, ChainTx, DecodedMessage, MessageCodec, Module,
    ModuleRegistry, NewBlockNotice, NewBlockStream, Repository, ValidatorSetEntry,
};
use crate::services::ParserContext;

/// Fixed timestamp so assertions are deterministic.
pub fn test_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

/// A block whose hash is derived from its height.
pub fn chain_block(height: u64, tx_count: u32) -> ChainBlock {
    let mut hash = [0u8; 32];
    hash[..8].copy_from_slice(&height.to_be_bytes());
    ChainBlock {
        height,
        hash,
        proposer_address: [0xaa; 20],
        time: test_time(),
        tx_count,
        last_commit: vec![],
    }
}

/// A successful tx whose hash is derived from (height, index).
pub fn chain_tx(height: u64, index: u32, gas_used: u64) -> ChainTx {
    let mut hash = [0u8; 32];
    hash[..8].copy_from_slice(&height.to_be_bytes());
    hash[8..12].copy_from_slice(&index.to_be_bytes());
    ChainTx {
        hash,
        height,
        index,
        success: true,
        messages: serde_json::json!([]),
        memo: String::new(),
        signatures: vec![],
        signer_infos: serde_json::json!([]),
        fee: serde_json::json!({}),
        gas_wanted: gas_used,
        gas_used,
        raw_log: String::new(),
        logs: serde_json::json!([]),
    }
}

pub fn validator_entry(address: [u8; 20], voting_power: i64) -> ValidatorSetEntry {
    ValidatorSetEntry {
        address,
        pub_key: "dGVzdC1wdWJrZXk=".to_string(),
        voting_power,
        proposer_priority: 0,
    }
}

// =============================================================================
// FakeRepository
// =============================================================================

#[derive(Default)]
struct RepoState {
    blocks: BTreeMap<u64, Block>,
    txs: HashMap<(u64, u32), Transaction>,
    validators: HashMap<[u8; 20], Validator>,
    voting_powers: Vec<ValidatorVotingPower>,
    commits: Vec<CommitSignature>,
    messages: Vec<Message>,
    accounts: HashMap<AccAddress, (u64, DateTime<Utc>)>,
    epoch: Option<Epoch>,
}

/// In-memory [`Repository`].
#[derive(Clone, Default)]
pub struct FakeRepository {
    state: Arc<Mutex<RepoState>>,
}

impl FakeRepository {
    /// Pre-populate placeholder blocks at the given heights.
    pub fn with_heights(heights: &[u64]) -> Self {
        let repo = Self::default();
        {
            let mut state = repo.state.lock().unwrap();
            for &h in heights {
                let raw = chain_block(h, 0);
                state.blocks.insert(
                    h,
                    Block {
                        height: h,
                        hash: crate::models::BlockHash(raw.hash),
                        proposer: crate::models::ConsAddress(raw.proposer_address),
                        timestamp: raw.time,
                        tx_count: 0,
                        total_gas: 0,
                    },
                );
            }
        }
        repo
    }

    pub fn block(&self, height: u64) -> Option<Block> {
        self.state.lock().unwrap().blocks.get(&height).cloned()
    }

    pub fn block_count(&self) -> usize {
        self.state.lock().unwrap().blocks.len()
    }

    pub fn tx_count(&self) -> usize {
        self.state.lock().unwrap().txs.len()
    }

    pub fn commit_signatures(&self) -> Vec<CommitSignature> {
        self.state.lock().unwrap().commits.clone()
    }

    pub fn account_count(&self) -> usize {
        self.state.lock().unwrap().accounts.len()
    }

    pub fn account_tx_count(&self, address: &AccAddress) -> u64 {
        self.state
            .lock()
            .unwrap()
            .accounts
            .get(address)
            .map(|(count, _)| *count)
            .unwrap_or(0)
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().unwrap().messages.clone()
    }
}

#[async_trait]
impl Repository for FakeRepository {
    async fn has_block(&self, height: u64) -> StorageResult<bool> {
        Ok(self.state.lock().unwrap().blocks.contains_key(&height))
    }

    async fn save_block(&self, block: &Block) -> StorageResult<()> {
        // Idempotent by height: second writes are discarded.
        self.state
            .lock()
            .unwrap()
            .blocks
            .entry(block.height)
            .or_insert_with(|| block.clone());
        Ok(())
    }

    async fn last_block_height(&self) -> StorageResult<Option<u64>> {
        Ok(self.state.lock().unwrap().blocks.keys().next_back().copied())
    }

    async fn total_blocks(&self) -> StorageResult<u64> {
        Ok(self.state.lock().unwrap().blocks.len() as u64)
    }

    async fn missing_heights(&self, from: u64, to: u64) -> StorageResult<Vec<u64>> {
        let state = self.state.lock().unwrap();
        Ok((from..=to).filter(|h| !state.blocks.contains_key(h)).collect())
    }

    async fn save_tx(&self, tx: &Transaction) -> StorageResult<()> {
        self.state
            .lock()
            .unwrap()
            .txs
            .entry((tx.height, tx.tx_index))
            .or_insert_with(|| tx.clone());
        Ok(())
    }

    async fn save_messages(&self, messages: &[Message]) -> StorageResult<()> {
        self.state.lock().unwrap().messages.extend_from_slice(messages);
        Ok(())
    }

    async fn save_validators(&self, validators: &[Validator]) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        for v in validators {
            state.validators.insert(v.cons_address.0, v.clone());
        }
        Ok(())
    }

    async fn save_validator_voting_powers(
        &self,
        powers: &[ValidatorVotingPower],
    ) -> StorageResult<()> {
        self.state
            .lock()
            .unwrap()
            .voting_powers
            .extend_from_slice(powers);
        Ok(())
    }

    async fn save_commit_signatures(&self, sigs: &[CommitSignature]) -> StorageResult<()> {
        self.state.lock().unwrap().commits.extend_from_slice(sigs);
        Ok(())
    }

    async fn upsert_account(&self, account: &Account) -> StorageResult<()> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .accounts
            .entry(account.address.clone())
            .or_insert((0, account.last_active));
        entry.0 += 1;
        entry.1 = entry.1.max(account.last_active);
        Ok(())
    }

    async fn epoch(&self) -> StorageResult<Option<Epoch>> {
        Ok(self.state.lock().unwrap().epoch.clone())
    }

    async fn save_epoch(&self, epoch: &Epoch) -> StorageResult<()> {
        self.state.lock().unwrap().epoch = Some(epoch.clone());
        Ok(())
    }

    async fn close(&self) {}
}

// =============================================================================
// FakeSource
// =============================================================================

#[derive(Default)]
struct SourceState {
    new_blocks: Option<Vec<u64>>,
}

/// In-memory [`ChainSource`]. Heights up to `tip` are served with
/// generated blocks unless explicitly overridden.
pub struct FakeSource {
    tip: u64,
    blocks: HashMap<u64, ChainBlock>,
    results: HashMap<u64, BlockResults>,
    txs: HashMap<u64, Vec<ChainTx>>,
    validators: HashMap<u64, Vec<ValidatorSetEntry>>,
    state: Mutex<SourceState>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            tip: 0,
            blocks: HashMap::new(),
            results: HashMap::new(),
            txs: HashMap::new(),
            validators: HashMap::new(),
            state: Mutex::new(SourceState::default()),
        }
    }

    pub fn with_tip(mut self, tip: u64) -> Self {
        self.tip = tip;
        self
    }

    pub fn with_block(mut self, block: ChainBlock) -> Self {
        self.tip = self.tip.max(block.height);
        self.blocks.insert(block.height, block);
        self
    }

    pub fn with_results(mut self, results: BlockResults) -> Self {
        self.results.insert(results.height, results);
        self
    }

    pub fn with_txs(mut self, height: u64, txs: Vec<ChainTx>) -> Self {
        self.txs.insert(height, txs);
        self
    }

    pub fn with_validators(mut self, height: u64, validators: Vec<ValidatorSetEntry>) -> Self {
        self.validators.insert(height, validators);
        self
    }

    /// Heights the first subscription will announce.
    pub fn with_new_blocks(self, heights: &[u64]) -> Self {
        self.state.lock().unwrap().new_blocks = Some(heights.to_vec());
        self
    }
}

impl Default for FakeSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainSource for FakeSource {
    async fn chain_id(&self) -> ChainResult<String> {
        Ok("harbor-test-1".to_string())
    }

    async fn latest_height(&self) -> ChainResult<u64> {
        Ok(self.tip)
    }

    async fn block(&self, height: u64) -> ChainResult<ChainBlock> {
        if let Some(block) = self.blocks.get(&height) {
            return Ok(block.clone());
        }
        if height <= self.tip {
            return Ok(chain_block(height, 0));
        }
        Err(ChainError::BlockFetchError {
            height,
            message: "unknown height".into(),
        })
    }

    async fn block_results(&self, height: u64) -> ChainResult<BlockResults> {
        Ok(self.results.get(&height).cloned().unwrap_or(BlockResults {
            height,
            tx_results: vec![],
            block_events: vec![],
        }))
    }

    async fn txs(&self, block: &ChainBlock) -> ChainResult<Vec<ChainTx>> {
        Ok(self.txs.get(&block.height).cloned().unwrap_or_default())
    }

    async fn validators(&self, height: u64) -> ChainResult<Vec<ValidatorSetEntry>> {
        Ok(self
            .validators
            .get(&height)
            .cloned()
            .unwrap_or_else(|| vec![validator_entry([0xaa; 20], 100)]))
    }

    async fn subscribe_new_blocks(&self) -> ChainResult<NewBlockStream> {
        let heights = self
            .state
            .lock()
            .unwrap()
            .new_blocks
            .take()
            .unwrap_or_default();
        Ok(futures::stream::iter(
            heights
                .into_iter()
                .map(|height| Ok::<_, ChainError>(NewBlockNotice { height })),
        )
        .boxed())
    }

    async fn genesis(&self) -> ChainResult<GenesisDoc> {
        Ok(GenesisDoc {
            chain_id: "harbor-test-1".to_string(),
            genesis_time: test_time(),
            initial_height: 0,
            app_state: serde_json::Map::new(),
        })
    }
}

// =============================================================================
// FakeCodec
// =============================================================================

/// Minimal JSON message codec: the `@type` field is the discriminator.
pub struct FakeCodec;

impl MessageCodec for FakeCodec {
    fn decode_message(&self, raw: &serde_json::Value) -> IndexerResult<DecodedMessage> {
        let type_url = raw
            .get("@type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| IndexerError::Decode("message has no @type".into()))?
            .trim_start_matches('/')
            .to_string();

        Ok(DecodedMessage {
            type_url,
            value: raw.clone(),
            involved_addresses: vec![],
        })
    }

    fn decode_inner_messages(&self, exec: &DecodedMessage) -> IndexerResult<Vec<DecodedMessage>> {
        let msgs = exec
            .value
            .get("msgs")
            .and_then(|m| m.as_array())
            .ok_or_else(|| IndexerError::Decode("authz exec has no msgs".into()))?;
        msgs.iter().map(|m| self.decode_message(m)).collect()
    }
}

// =============================================================================
// Context builder
// =============================================================================

/// Builder for a [`ParserContext`] wired to fakes.
pub struct TestContextBuilder {
    parsing: ParsingConfig,
    repository: Option<FakeRepository>,
    source: Option<FakeSource>,
    modules: Vec<Arc<dyn Module>>,
}

impl TestContextBuilder {
    pub fn new() -> Self {
        Self {
            parsing: ParsingConfig {
                average_block_time_secs: 1,
                listen_new_blocks: false,
                ..Default::default()
            },
            repository: None,
            source: None,
            modules: vec![],
        }
    }

    pub fn parsing(mut self, parsing: ParsingConfig) -> Self {
        self.parsing = parsing;
        self
    }

    pub fn start_height(mut self, height: u64) -> Self {
        self.parsing.start_height = height;
        self
    }

    pub fn parse_genesis(mut self, on: bool) -> Self {
        self.parsing.parse_genesis = on;
        self
    }

    pub fn concurrent_sync(mut self, on: bool) -> Self {
        self.parsing.concurrent_sync = on;
        self
    }

    pub fn average_block_time(mut self, secs: u64) -> Self {
        self.parsing.average_block_time_secs = secs;
        self
    }

    pub fn repository(mut self, repo: FakeRepository) -> Self {
        self.repository = Some(repo);
        self
    }

    pub fn source(mut self, source: FakeSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn modules(mut self, modules: Vec<Arc<dyn Module>>) -> Self {
        self.modules = modules;
        self
    }

    pub fn build(self) -> Arc<ParserContext> {
        ParserContext::new(
            self.parsing,
            "harbor-test-1".to_string(),
            Arc::new(self.source.unwrap_or_default()),
            Arc::new(self.repository.unwrap_or_default()),
            Arc::new(FakeCodec),
            Arc::new(ModuleRegistry::from_modules(self.modules)),
        )
    }
}

impl Default for TestContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
