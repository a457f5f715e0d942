//! Models for the bucket module.

use serde::{Deserialize, Serialize};

/// A bucket row, carrying creation metadata, mutation metadata and
/// the removal tombstone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    /// On-chain bucket id (decimal, may exceed u64).
    pub bucket_id: String,
    pub bucket_name: String,
    pub owner: String,
    pub payment_address: String,
    pub visibility: String,
    pub status: String,
    pub charged_read_quota: u64,
    pub primary_sp_id: i64,
    pub global_virtual_group_family_id: i64,
    pub removed: bool,
    pub create_at: i64,
    pub create_tx_hash: String,
    pub create_time: i64,
    pub update_at: i64,
    pub update_tx_hash: String,
    pub update_time: i64,
}

/// Mutation of an existing bucket's payment settings.
#[derive(Debug, Clone)]
pub struct BucketUpdate {
    pub bucket_id: String,
    pub charged_read_quota: u64,
    pub payment_address: String,
    pub visibility: String,
    pub update_at: i64,
    pub update_tx_hash: String,
    pub update_time: i64,
}

/// Tombstone for a deleted bucket; only mutation metadata advances.
#[derive(Debug, Clone)]
pub struct BucketRemoval {
    pub bucket_id: String,
    pub update_at: i64,
    pub update_tx_hash: String,
    pub update_time: i64,
}
