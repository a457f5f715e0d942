//! Wire types for the node's JSON-RPC responses.
//!
//! Tendermint encodes heights, gas and voting power as decimal
//! strings, hashes and addresses as bare uppercase hex, and raw
//! transactions as base64. The conversion helpers here map those
//! into the core wire structs, surfacing malformed payloads as
//! [`ChainError::ResponseError`].

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use harbor_core::error::{ChainError, ChainResult};
use harbor_core::ports::{
    BlockResults, ChainBlock, Event, EventAttribute, RawCommitVote, TxResult, ValidatorSetEntry,
};

// =============================================================================
// JSON-RPC envelope
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct RpcEnvelope<T> {
    pub result: Option<T>,
    pub error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<String>,
}

impl<T> RpcEnvelope<T> {
    pub fn into_result(self, method: &str) -> ChainResult<T> {
        if let Some(err) = self.error {
            return Err(ChainError::RpcError(format!(
                "{} failed: {} ({}){}",
                method,
                err.message,
                err.code,
                err.data.map(|d| format!(": {}", d)).unwrap_or_default()
            )));
        }
        self.result
            .ok_or_else(|| ChainError::ResponseError(format!("{}: empty result", method)))
    }
}

// =============================================================================
// /status
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct StatusResult {
    pub node_info: NodeInfo,
    pub sync_info: SyncInfo,
}

#[derive(Debug, Deserialize)]
pub struct NodeInfo {
    pub network: String,
}

#[derive(Debug, Deserialize)]
pub struct SyncInfo {
    pub latest_block_height: String,
}

// =============================================================================
// /block
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct BlockResult {
    pub block_id: BlockId,
    pub block: BlockJson,
}

#[derive(Debug, Deserialize)]
pub struct BlockId {
    pub hash: String,
}

#[derive(Debug, Deserialize)]
pub struct BlockJson {
    pub header: HeaderJson,
    pub data: BlockDataJson,
    #[serde(default)]
    pub last_commit: Option<LastCommitJson>,
}

#[derive(Debug, Deserialize)]
pub struct HeaderJson {
    pub height: String,
    pub time: DateTime<Utc>,
    pub proposer_address: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct BlockDataJson {
    #[serde(default)]
    pub txs: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct LastCommitJson {
    #[serde(default)]
    pub signatures: Vec<CommitSigJson>,
}

#[derive(Debug, Deserialize)]
pub struct CommitSigJson {
    #[serde(default)]
    pub validator_address: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub signature: Option<String>,
}

impl BlockResult {
    pub fn into_chain_block(self) -> ChainResult<ChainBlock> {
        let height = parse_u64(&self.block.header.height, "block.header.height")?;
        let hash = parse_hash32(&self.block_id.hash, "block_id.hash")?;
        let proposer_address =
            parse_addr20(&self.block.header.proposer_address, "header.proposer_address")?;

        let mut last_commit = Vec::new();
        if let Some(commit) = self.block.last_commit {
            for sig in commit.signatures {
                // Absent votes carry an empty address; keep them with a
                // nil signature so the pipeline can skip them uniformly.
                if sig.validator_address.is_empty() {
                    continue;
                }
                last_commit.push(RawCommitVote {
                    validator_address: parse_addr20(
                        &sig.validator_address,
                        "commit.validator_address",
                    )?,
                    timestamp: sig.timestamp.unwrap_or(self.block.header.time),
                    signature: sig
                        .signature
                        .and_then(|s| base64::engine::general_purpose::STANDARD.decode(s).ok()),
                });
            }
        }

        Ok(ChainBlock {
            height,
            hash,
            proposer_address,
            time: self.block.header.time,
            tx_count: self.block.data.txs.len() as u32,
            last_commit,
        })
    }

    /// Decode the raw transactions carried by the block.
    pub fn raw_txs(&self) -> Vec<Vec<u8>> {
        self.block
            .data
            .txs
            .iter()
            .filter_map(|tx| base64::engine::general_purpose::STANDARD.decode(tx).ok())
            .collect()
    }
}

// =============================================================================
// /block_results
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct BlockResultsResult {
    pub height: String,
    #[serde(default)]
    pub txs_results: Option<Vec<TxResultJson>>,
    #[serde(default)]
    pub finalize_block_events: Vec<EventJson>,
}

#[derive(Debug, Deserialize)]
pub struct TxResultJson {
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub gas_wanted: String,
    #[serde(default)]
    pub gas_used: String,
    #[serde(default)]
    pub events: Vec<EventJson>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EventJson {
    pub r#type: String,
    #[serde(default)]
    pub attributes: Vec<EventAttributeJson>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EventAttributeJson {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

impl From<EventJson> for Event {
    fn from(e: EventJson) -> Self {
        Event {
            type_url: e.r#type,
            attributes: e
                .attributes
                .into_iter()
                .map(|a| EventAttribute {
                    key: a.key,
                    value: a.value,
                })
                .collect(),
        }
    }
}

impl BlockResultsResult {
    /// Convert, filling each tx result's hash from the block's raw
    /// transactions (sha256 over the raw bytes).
    pub fn into_block_results(self, raw_txs: &[Vec<u8>]) -> ChainResult<BlockResults> {
        use sha2::{Digest, Sha256};

        let height = parse_u64(&self.height, "block_results.height")?;
        let tx_results = self
            .txs_results
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(i, tx)| {
                let tx_hash = raw_txs.get(i).map(|raw| {
                    let digest: [u8; 32] = Sha256::digest(raw).into();
                    harbor_core::models::TxHash(digest)
                });
                Ok(TxResult {
                    code: tx.code,
                    gas_wanted: parse_u64_lenient(&tx.gas_wanted),
                    gas_used: parse_u64_lenient(&tx.gas_used),
                    tx_hash,
                    events: tx.events.into_iter().map(Event::from).collect(),
                })
            })
            .collect::<ChainResult<Vec<_>>>()?;

        Ok(BlockResults {
            height,
            tx_results,
            block_events: self
                .finalize_block_events
                .into_iter()
                .map(Event::from)
                .collect(),
        })
    }
}

// =============================================================================
// /validators
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ValidatorsResult {
    pub validators: Vec<ValidatorJson>,
    pub total: String,
}

#[derive(Debug, Deserialize)]
pub struct ValidatorJson {
    pub address: String,
    pub pub_key: PubKeyJson,
    pub voting_power: String,
    #[serde(default)]
    pub proposer_priority: String,
}

#[derive(Debug, Deserialize)]
pub struct PubKeyJson {
    #[serde(default)]
    pub value: String,
}

impl ValidatorJson {
    pub fn into_entry(self) -> ChainResult<ValidatorSetEntry> {
        Ok(ValidatorSetEntry {
            address: parse_addr20(&self.address, "validator.address")?,
            pub_key: self.pub_key.value,
            voting_power: parse_i64(&self.voting_power, "validator.voting_power")?,
            proposer_priority: parse_i64_lenient(&self.proposer_priority),
        })
    }
}

// =============================================================================
// /genesis and /genesis_chunked
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct GenesisResult {
    pub genesis: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct GenesisChunkResult {
    pub chunk: String,
    pub total: String,
    pub data: String,
}

// =============================================================================
// Tx service (gRPC gateway)
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct BlockTxsResult {
    #[serde(default)]
    pub txs: Vec<GatewayTx>,
    #[serde(default)]
    pub tx_responses: Vec<GatewayTxResponse>,
}

#[derive(Debug, Deserialize)]
pub struct GatewayTx {
    #[serde(default)]
    pub body: GatewayTxBody,
    #[serde(default)]
    pub auth_info: serde_json::Value,
    #[serde(default)]
    pub signatures: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct GatewayTxBody {
    #[serde(default)]
    pub messages: serde_json::Value,
    #[serde(default)]
    pub memo: String,
}

#[derive(Debug, Deserialize)]
pub struct GatewayTxResponse {
    pub txhash: String,
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub gas_wanted: String,
    #[serde(default)]
    pub gas_used: String,
    #[serde(default)]
    pub raw_log: String,
    #[serde(default)]
    pub logs: serde_json::Value,
}

// =============================================================================
// Parsing helpers
// =============================================================================

pub fn parse_u64(s: &str, field: &str) -> ChainResult<u64> {
    s.parse()
        .map_err(|_| ChainError::ResponseError(format!("{} is not a u64: {:?}", field, s)))
}

pub fn parse_i64(s: &str, field: &str) -> ChainResult<i64> {
    s.parse()
        .map_err(|_| ChainError::ResponseError(format!("{} is not an i64: {:?}", field, s)))
}

/// Gas fields are occasionally empty on old nodes; treat that as 0.
pub fn parse_u64_lenient(s: &str) -> u64 {
    s.parse().unwrap_or(0)
}

pub fn parse_i64_lenient(s: &str) -> i64 {
    s.parse().unwrap_or(0)
}

pub fn parse_hash32(s: &str, field: &str) -> ChainResult<[u8; 32]> {
    let bytes = hex::decode(s.trim_start_matches("0x"))
        .map_err(|_| ChainError::ResponseError(format!("{} is not hex: {:?}", field, s)))?;
    bytes
        .try_into()
        .map_err(|_| ChainError::ResponseError(format!("{} is not 32 bytes", field)))
}

pub fn parse_addr20(s: &str, field: &str) -> ChainResult<[u8; 20]> {
    let bytes = hex::decode(s.trim_start_matches("0x"))
        .map_err(|_| ChainError::ResponseError(format!("{} is not hex: {:?}", field, s)))?;
    bytes
        .try_into()
        .map_err(|_| ChainError::ResponseError(format!("{} is not 20 bytes", field)))
}
