//! Bucket module.
//!
//! Projects bucket lifecycle events into the `buckets` table.
//!
//! # Indexed Events
//!
//! - `EventCreateBucket` - bucket created
//! - `EventDeleteBucket` - bucket removed (tombstone)
//! - `EventUpdateBucketInfo` - quota/payment/visibility mutation

mod handler;
pub mod models;
pub mod storage;

use std::sync::Arc;

use harbor_core::ports::{EventHandler, Module, PrepareTables, Repository};
use harbor_storage::Database;

pub use models::{Bucket, BucketRemoval, BucketUpdate};
pub use storage::{BucketStorage, PgBucketStorage, MIGRATIONS};

pub use handler::BucketHandler;

/// Bucket module: owns the `buckets` table.
pub struct BucketModule {
    handler: BucketHandler,
}

impl BucketModule {
    pub fn new(db: Database, repository: Arc<dyn Repository>) -> Self {
        let storage: Arc<dyn BucketStorage> = Arc::new(PgBucketStorage::new(db));
        Self {
            handler: BucketHandler::new(storage, repository),
        }
    }

    /// Wire a custom storage (used by tests).
    pub fn with_storage(storage: Arc<dyn BucketStorage>, repository: Arc<dyn Repository>) -> Self {
        Self {
            handler: BucketHandler::new(storage, repository),
        }
    }
}

impl Module for BucketModule {
    fn name(&self) -> &'static str {
        "bucket"
    }

    fn prepare_tables(&self) -> Option<&dyn PrepareTables> {
        Some(&self.handler)
    }

    fn event_handler(&self) -> Option<&dyn EventHandler> {
        Some(&self.handler)
    }
}
