//! Per-height processing pipelines.
//!
//! [`ExplorerPipeline`] is the full-fidelity flavor: for each height
//! it fetches the block, its execution results, its transactions and
//! the validator set, persists the canonical rows, and fans out to
//! the module hooks. The chain node RPC is the bottleneck, so the
//! fetches run sequentially; tx and account export run concurrently
//! once the block row is in.
//!
//! The error asymmetry is deliberate: engine-owned persistence
//! failures propagate (the height is retried), module hook failures
//! are logged and swallowed by the dispatcher.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::error::{IndexerError, IndexerResult};
use crate::metrics::{record_db_stats, record_decode_error};
use crate::models::{
    Account, AccAddress, Block, BlockHash, CommitSignature, ConsAddress, GenesisDoc, Message,
    Transaction, TxHash, Validator, ValidatorVotingPower,
};
use crate::ports::{ChainBlock, ChainTx, EventContext, ValidatorSetEntry};
use crate::services::ParserContext;

/// One per-height pipeline flavor.
#[async_trait]
pub trait BlockPipeline: Send + Sync {
    /// Process a height end to end; returns the block's timestamp so
    /// the worker can observe its processing lag.
    async fn process_block(&self, height: u64) -> IndexerResult<DateTime<Utc>>;
}

// =============================================================================
// Explorer pipeline
// =============================================================================

/// Full-fidelity pipeline: blocks, validators, commits, txs,
/// messages, accounts, and every module hook.
pub struct ExplorerPipeline {
    ctx: Arc<ParserContext>,
}

impl ExplorerPipeline {
    pub fn new(ctx: Arc<ParserContext>) -> Self {
        Self { ctx }
    }

    /// Load the genesis document and hand it to every genesis module.
    #[instrument(skip(self))]
    pub async fn process_genesis(&self) -> IndexerResult<DateTime<Utc>> {
        let doc = self.load_genesis().await?;
        info!(chain_id = %doc.chain_id, "Processing genesis");

        self.ctx.registry.dispatch_genesis(&doc).await;

        Ok(doc.genesis_time)
    }

    async fn load_genesis(&self) -> IndexerResult<GenesisDoc> {
        if let Some(path) = &self.ctx.parsing.genesis_file_path {
            debug!(path = %path.display(), "Loading genesis from file");
            let content = std::fs::read_to_string(path).map_err(|e| {
                IndexerError::Config(format!("cannot read genesis file {}: {}", path.display(), e))
            })?;
            return serde_json::from_str(&content)
                .map_err(|e| IndexerError::Decode(format!("invalid genesis document: {}", e)));
        }

        // The adapter falls back to the chunked genesis API on its own.
        Ok(self.ctx.source.genesis().await?)
    }

    /// Persist a block and everything it carries.
    #[instrument(skip(self))]
    async fn process_height(&self, height: u64) -> IndexerResult<DateTime<Utc>> {
        let source = &self.ctx.source;

        // Sequential fetches: the node RPC is the bottleneck.
        let block = source.block(height).await?;
        let results = source.block_results(height).await?;
        let txs = source.txs(&block).await?;
        let validators = source.validators(height).await?;

        self.export_validators(height, &validators).await?;

        // The proposer must be in the set we just fetched.
        let proposer = find_validator_by_addr(&block.proposer_address, &validators)
            .ok_or_else(|| {
                IndexerError::InvariantViolation(format!(
                    "proposer {} not found in validator set at height {}",
                    hex::encode(block.proposer_address),
                    height
                ))
            })?;
        debug!(proposer = %hex::encode(proposer.address), "Proposer resolved");

        let total_gas = txs.iter().map(|tx| tx.gas_used).sum();
        self.ctx
            .repository
            .save_block(&Block {
                height: block.height,
                hash: BlockHash(block.hash),
                proposer: ConsAddress(block.proposer_address),
                timestamp: block.time,
                tx_count: txs.len() as u32,
                total_gas,
            })
            .await?;

        self.export_commit_signatures(&block, &validators).await?;

        self.ctx
            .registry
            .dispatch_block(&block, &results, &txs, &validators)
            .await;

        self.export_events(&block, &results).await;

        // Tx and account export are independent of each other.
        let (tx_res, acct_res) = tokio::join!(
            self.export_txs(&txs),
            self.export_accounts(&block, &txs),
        );
        tx_res?;
        acct_res?;

        Ok(block.time)
    }

    async fn export_validators(
        &self,
        height: u64,
        validators: &[ValidatorSetEntry],
    ) -> IndexerResult<()> {
        let rows: Vec<Validator> = validators
            .iter()
            .map(|v| Validator {
                cons_address: ConsAddress(v.address),
                cons_pubkey: v.pub_key.clone(),
            })
            .collect();
        self.ctx.repository.save_validators(&rows).await?;

        let powers: Vec<ValidatorVotingPower> = validators
            .iter()
            .map(|v| ValidatorVotingPower {
                cons_address: ConsAddress(v.address),
                voting_power: v.voting_power,
                height,
            })
            .collect();
        self.ctx
            .repository
            .save_validator_voting_powers(&powers)
            .await?;

        Ok(())
    }

    /// Export the previous block's pre-commits carried in this block.
    /// Votes with no signature are absent validators and are skipped.
    async fn export_commit_signatures(
        &self,
        block: &ChainBlock,
        validators: &[ValidatorSetEntry],
    ) -> IndexerResult<()> {
        if block.height == 0 {
            return Ok(());
        }

        let mut sigs = Vec::with_capacity(block.last_commit.len());
        for vote in &block.last_commit {
            if vote.signature.is_none() {
                continue;
            }
            let entry = find_validator_by_addr(&vote.validator_address, validators)
                .ok_or_else(|| {
                    IndexerError::InvariantViolation(format!(
                        "commit signer {} not found in validator set at height {}",
                        hex::encode(vote.validator_address),
                        block.height
                    ))
                })?;

            sigs.push(CommitSignature {
                validator_address: ConsAddress(vote.validator_address),
                voting_power: entry.voting_power,
                proposer_priority: entry.proposer_priority,
                height: block.height - 1,
                timestamp: vote.timestamp,
            });
        }

        self.ctx.repository.save_commit_signatures(&sigs).await
            .map_err(Into::into)
    }

    /// Forward every event the block produced to the event modules.
    /// Each module's own owned-set filter decides what it consumes.
    async fn export_events(&self, block: &ChainBlock, results: &crate::ports::BlockResults) {
        let registry = &self.ctx.registry;
        let modules = registry.event_modules_for_height(block.height).await;
        if modules.is_empty() {
            return;
        }

        for tx_result in &results.tx_results {
            let ctx = EventContext {
                height: block.height,
                block_hash: BlockHash(block.hash),
                timestamp: block.time,
                tx_hash: tx_result.tx_hash.clone(),
            };
            for event in &tx_result.events {
                registry.dispatch_event(&modules, &ctx, event).await;
            }
        }

        let ctx = EventContext {
            height: block.height,
            block_hash: BlockHash(block.hash),
            timestamp: block.time,
            tx_hash: None,
        };
        for event in &results.block_events {
            registry.dispatch_event(&modules, &ctx, event).await;
        }
    }

    /// Persist transactions and their messages, dispatching the tx,
    /// msg and msg-exec hooks along the way.
    ///
    /// Also used by the one-shot `parse transactions all` command.
    pub async fn export_txs(&self, txs: &[ChainTx]) -> IndexerResult<()> {
        for tx in txs {
            self.ctx.repository.save_tx(&to_transaction(tx)).await?;
            self.ctx.registry.dispatch_tx(tx).await;
            self.export_messages(tx).await?;
        }

        // Refresh the database-side gauges now that the rows are in.
        let total = self.ctx.repository.total_blocks().await?;
        let latest = self.ctx.repository.last_block_height().await?.unwrap_or(0);
        record_db_stats(total, latest);

        Ok(())
    }

    async fn export_messages(&self, tx: &ChainTx) -> IndexerResult<()> {
        let raw_msgs = match tx.messages.as_array() {
            Some(msgs) => msgs,
            None => return Ok(()),
        };

        let mut rows = Vec::with_capacity(raw_msgs.len());
        for (index, raw) in raw_msgs.iter().enumerate() {
            let msg = match self.ctx.codec.decode_message(raw) {
                Ok(msg) => msg,
                Err(e) => {
                    // A single undecodable message must not wedge the
                    // chain; the raw JSON is persisted with the tx
                    // regardless.
                    warn!(
                        tx = %hex::encode(tx.hash),
                        index,
                        error = %e,
                        "Message decode failed, skipping"
                    );
                    record_decode_error("message");
                    continue;
                }
            };

            rows.push(Message {
                tx_hash: TxHash(tx.hash),
                index: index as u32,
                type_url: msg.type_url.clone(),
                value: msg.value.clone(),
                involved_addresses: msg.involved_addresses.clone(),
                height: tx.height,
            });

            self.ctx.registry.dispatch_msg(index, &msg, tx).await;

            if msg.is_authz_exec() {
                match self.ctx.codec.decode_inner_messages(&msg) {
                    Ok(inner_msgs) => {
                        for (inner_index, inner) in inner_msgs.iter().enumerate() {
                            self.ctx
                                .registry
                                .dispatch_msg_exec(index, &msg, inner_index, inner, tx)
                                .await;
                        }
                    }
                    Err(e) => {
                        warn!(
                            tx = %hex::encode(tx.hash),
                            index,
                            error = %e,
                            "Authz inner decode failed, skipping"
                        );
                        record_decode_error("message");
                    }
                }
            }
        }

        self.ctx.repository.save_messages(&rows).await?;
        Ok(())
    }

    /// Upsert an account row for every hex address appearing as an
    /// event attribute value in the tx logs.
    async fn export_accounts(&self, block: &ChainBlock, txs: &[ChainTx]) -> IndexerResult<()> {
        for tx in txs {
            // One upsert per address per tx: tx_count counts
            // transactions, not attribute occurrences.
            let mut seen: HashSet<AccAddress> = HashSet::new();
            for address in scan_log_addresses(&tx.logs) {
                if seen.insert(address.clone()) {
                    self.ctx
                        .repository
                        .upsert_account(&Account {
                            address,
                            last_active: block.time,
                        })
                        .await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BlockPipeline for ExplorerPipeline {
    async fn process_block(&self, height: u64) -> IndexerResult<DateTime<Utc>> {
        if height == 0 {
            return self.process_genesis().await;
        }
        self.process_height(height).await
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Find a validator-set entry by consensus address.
pub fn find_validator_by_addr<'a>(
    address: &[u8; 20],
    validators: &'a [ValidatorSetEntry],
) -> Option<&'a ValidatorSetEntry> {
    validators.iter().find(|v| &v.address == address)
}

fn to_transaction(tx: &ChainTx) -> Transaction {
    Transaction {
        hash: TxHash(tx.hash),
        height: tx.height,
        tx_index: tx.index,
        success: tx.success,
        messages: tx.messages.clone(),
        memo: tx.memo.clone(),
        signatures: tx.signatures.clone(),
        signer_infos: tx.signer_infos.clone(),
        fee: tx.fee.clone(),
        gas_wanted: tx.gas_wanted,
        gas_used: tx.gas_used,
        raw_log: tx.raw_log.clone(),
        logs: tx.logs.clone(),
    }
}

/// Walk structured tx logs and collect every attribute value that
/// parses as a 20-byte hex address.
fn scan_log_addresses(logs: &serde_json::Value) -> Vec<AccAddress> {
    let mut out = Vec::new();
    let Some(logs) = logs.as_array() else {
        return out;
    };

    for log in logs {
        let Some(events) = log.get("events").and_then(|e| e.as_array()) else {
            continue;
        };
        for event in events {
            let Some(attrs) = event.get("attributes").and_then(|a| a.as_array()) else {
                continue;
            };
            for attr in attrs {
                if let Some(value) = attr.get("value").and_then(|v| v.as_str()) {
                    if let Some(addr) = parse_hex_address(value) {
                        out.push(addr);
                    }
                }
            }
        }
    }

    out
}

/// Parse a `0x` + 40-hex-chars account address; anything else is not
/// an address.
fn parse_hex_address(value: &str) -> Option<AccAddress> {
    let hex_part = value.strip_prefix("0x")?;
    if hex_part.len() != 40 {
        return None;
    }
    AccAddress::from_hex(value).ok()
}

// =============================================================================
// Tests
// =============================================================================
