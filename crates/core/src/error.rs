//! Error types for the indexer domain layer.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`ChainError`] - Chain node RPC/subscription errors
//! - [`StorageError`] - Database/repository errors
//! - [`ModuleError`] - Errors surfaced by module hooks
//! - [`IndexerError`] - Top-level orchestration errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries. Chain and storage
//! failures are retried at the pipeline level; module failures are
//! logged and swallowed by the dispatcher; invariant violations abort
//! the height and send it back to the queue.

use thiserror::Error;

// =============================================================================
// Chain Errors
// =============================================================================

/// Chain node RPC and connectivity errors.
///
/// These errors occur when communicating with the chain node over
/// HTTP JSON-RPC or the WebSocket event subscription.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Connection to the node failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// RPC request failed.
    #[error("RPC error: {0}")]
    RpcError(String),

    /// New-block subscription failed or disconnected.
    #[error("Subscription error: {0}")]
    SubscriptionError(String),

    /// Response payload could not be decoded.
    #[error("Response decode error: {0}")]
    ResponseError(String),

    /// Block could not be fetched.
    #[error("Block fetch error at height {height}: {message}")]
    BlockFetchError {
        /// Height that failed to fetch.
        height: u64,
        /// Error details.
        message: String,
    },

    /// Operation timed out.
    #[error("Timeout waiting for {0}")]
    Timeout(String),
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Database and repository errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to establish database connection.
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    /// SQL query execution failed.
    #[error("Query execution error: {0}")]
    QueryError(String),

    /// Requested record was not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Database migration failed.
    #[error("Migration error: {0}")]
    MigrationError(String),

    /// Transaction begin/commit/rollback failed.
    #[error("Transaction error: {0}")]
    TransactionError(String),

    /// Data serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

// =============================================================================
// Module Errors
// =============================================================================

/// Errors returned by module hooks.
///
/// The dispatcher logs and swallows these so one failing module never
/// aborts block ingestion.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Typed event or message could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Event payload was missing a required attribute.
    #[error("Missing attribute {attribute} in {event}")]
    MissingAttribute {
        /// Event type URL.
        event: String,
        /// Attribute name that was absent.
        attribute: String,
    },

    /// Module-owned storage operation failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Anything else a module wants to surface.
    #[error("{0}")]
    Other(String),
}

// =============================================================================
// Indexer Errors
// =============================================================================

/// Top-level indexer orchestration errors.
///
/// This is the error type returned by the pipelines, workers, and
/// producers. It wraps all lower-level errors and adds
/// indexer-specific variants.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Chain connectivity error; the height is retried.
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    /// Storage/database error; the height is retried.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A cross-entity invariant did not hold (e.g. block proposer
    /// absent from the fetched validator set). Fatal for this height.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Codec failed to decode a message or typed event.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Invalid configuration; fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Graceful shutdown was requested.
    ///
    /// Not really an error but uses the error type for control flow.
    #[error("Indexer shutdown requested")]
    ShutdownRequested,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ModuleError> for IndexerError {
    fn from(err: ModuleError) -> Self {
        match err {
            ModuleError::Decode(msg) => IndexerError::Decode(msg),
            ModuleError::Storage(e) => IndexerError::Storage(e),
            other => IndexerError::Internal(other.to_string()),
        }
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for indexer operations.
pub type IndexerResult<T> = Result<T, IndexerError>;

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for module hooks.
pub type ModuleResult<T> = Result<T, ModuleError>;
