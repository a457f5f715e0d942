//! Domain models representing indexed blockchain data.
//!
//! These models are storage-agnostic and represent the canonical
//! form of indexed data within the domain layer. Domain-module rows
//! (buckets, objects, groups, ...) live with their owning modules;
//! everything here is owned by the ingestion engine itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Fixed-size byte newtypes
// =============================================================================

/// Macro to generate fixed-size byte newtypes with common functionality.
///
/// Generates:
/// - `from_hex()` - Parse from hex string (with or without 0x prefix)
/// - `to_hex()` - Convert to 0x-prefixed hex string
/// - `Display` trait implementation
/// - `From<[u8; N]>` implementation
macro_rules! bytes_newtype {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Parse from hex string (with or without 0x prefix).
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(s)?;
                let arr: [u8; $len] = bytes
                    .try_into()
                    .map_err(|_| hex::FromHexError::InvalidStringLength)?;
                Ok(Self(arr))
            }

            /// Convert to 0x-prefixed hex string.
            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }

            /// Get the inner bytes.
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }
    };
}

bytes_newtype!(
    /// 32-byte block hash.
    BlockHash,
    32
);

bytes_newtype!(
    /// 32-byte transaction hash.
    TxHash,
    32
);

bytes_newtype!(
    /// 20-byte validator consensus address.
    ConsAddress,
    20
);

bytes_newtype!(
    /// 20-byte account address (the 0x + 40 hex chars form seen in
    /// event attributes).
    AccAddress,
    20
);

// =============================================================================
// Block
// =============================================================================

/// Indexed block with all relevant metadata.
///
/// Created on first successful processing of its height; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Block height.
    pub height: u64,
    /// Block hash.
    pub hash: BlockHash,
    /// Consensus address of the block proposer.
    pub proposer: ConsAddress,
    /// Block timestamp.
    pub timestamp: DateTime<Utc>,
    /// Number of transactions in this block.
    pub tx_count: u32,
    /// Sum of gas used across all transactions.
    pub total_gas: u64,
}

// =============================================================================
// Transactions & messages
// =============================================================================

/// Indexed transaction.
///
/// `(height, tx_index)` and `hash` are both unique; rows are created
/// while exporting a block and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction hash.
    pub hash: TxHash,
    /// Height of the containing block.
    pub height: u64,
    /// Index within the block (0-based).
    pub tx_index: u32,
    /// Whether the transaction executed successfully.
    pub success: bool,
    /// Raw messages as a canonical JSON array.
    pub messages: serde_json::Value,
    /// Transaction memo.
    pub memo: String,
    /// Signatures (base64 strings).
    pub signatures: Vec<String>,
    /// Signer infos as canonical JSON.
    pub signer_infos: serde_json::Value,
    /// Fee as canonical JSON.
    pub fee: serde_json::Value,
    /// Gas requested.
    pub gas_wanted: u64,
    /// Gas consumed.
    pub gas_used: u64,
    /// Raw log output.
    pub raw_log: String,
    /// Structured logs as canonical JSON.
    pub logs: serde_json::Value,
}

/// One message within a transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Hash of the containing transaction.
    pub tx_hash: TxHash,
    /// Index within the transaction (0-based).
    pub index: u32,
    /// Fully-qualified message type URL.
    pub type_url: String,
    /// Message payload as canonical JSON.
    pub value: serde_json::Value,
    /// Addresses involved in the message.
    pub involved_addresses: Vec<String>,
    /// Height of the containing block.
    pub height: u64,
}

// =============================================================================
// Validators & commits
// =============================================================================

/// A validator as observed in a height's validator set.
///
/// The consensus address is the primary key; the pubkey is
/// write-through (whatever tuple is supplied is inserted or updated).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Validator {
    /// Consensus address.
    pub cons_address: ConsAddress,
    /// Consensus public key (base64).
    pub cons_pubkey: String,
}

/// Voting-power facet of a validator at an observation height.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorVotingPower {
    pub cons_address: ConsAddress,
    pub voting_power: i64,
    pub height: u64,
}

/// A validator's pre-commit vote for block `height`, carried in the
/// next block's `last_commit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitSignature {
    /// Consensus address of the signer.
    pub validator_address: ConsAddress,
    /// Voting power at signing time.
    pub voting_power: i64,
    /// Proposer priority at signing time.
    pub proposer_priority: i64,
    /// Height the vote commits.
    pub height: u64,
    /// Vote timestamp.
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Accounts
// =============================================================================

/// An account observed in transaction logs.
///
/// Upserted whenever its address appears as a hex attribute value in
/// any event of any tx log; `tx_count` uses increment semantics in
/// the repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Account address.
    pub address: AccAddress,
    /// Timestamp of the last block this account was active in.
    pub last_active: DateTime<Utc>,
}

// =============================================================================
// Epoch
// =============================================================================

/// Single-row marker of the last fully processed block.
///
/// Consulted by module idempotency checks and advanced by the
/// lightweight pipeline after event dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Epoch {
    /// Last fully processed height.
    pub height: u64,
    /// Hash of that block.
    pub block_hash: BlockHash,
    /// When the row was last advanced.
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Genesis
// =============================================================================

/// Canonical genesis document plus the per-module application state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisDoc {
    /// Chain identifier.
    pub chain_id: String,
    /// Genesis timestamp.
    pub genesis_time: DateTime<Utc>,
    /// Initial height (usually 0 or 1).
    #[serde(default)]
    pub initial_height: u64,
    /// Module name -> opaque JSON state.
    pub app_state: serde_json::Map<String, serde_json::Value>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_hash_hex_roundtrip() {
        let hex = "0x1234567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef";
        let hash = BlockHash::from_hex(hex).unwrap();
        assert_eq!(hash.to_hex(), hex);
    }

    #[test]
    fn cons_address_is_twenty_bytes() {
        let hex = "0x00000000000000000000000000000000deadbeef";
        let addr = ConsAddress::from_hex(hex).unwrap();
        assert_eq!(addr.to_hex(), hex);
        assert_eq!(addr.as_bytes().len(), 20);
    }

    #[test]
    fn acc_address_without_prefix() {
        let hex = "00000000000000000000000000000000deadbeef";
        let addr = AccAddress::from_hex(hex).unwrap();
        assert_eq!(addr.to_hex(), format!("0x{}", hex));
    }

    #[test]
    fn newtype_invalid_length() {
        // 32-byte hex into a 20-byte address must fail
        let hex = "0x1234567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef";
        assert!(AccAddress::from_hex(hex).is_err());
        // and the short form into a hash must fail too
        assert!(BlockHash::from_hex("0x1234").is_err());
    }

    #[test]
    fn newtype_from_bytes() {
        let bytes = [0xab; 32];
        let hash = TxHash::from(bytes);
        assert_eq!(hash.as_bytes(), &bytes);
    }
}
