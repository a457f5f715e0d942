//! Lightweight per-height pipeline.
//!
//! Fetches only the block and its execution results, persists a
//! minimal block row, and forwards events to the event modules, but
//! only events whose type is in the statically-known inclusion map
//! (the union of every module's owned set). Used when a
//! deployment only needs the object-lifecycle projections and can
//! tolerate missing tx, account and validator data.
//!
//! After dispatch the Epoch row is advanced, which is what the
//! modules' `is_processed` idempotency checks consult.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use crate::error::IndexerResult;
use crate::models::{Block, BlockHash, ConsAddress, Epoch};
use crate::ports::EventContext;
use crate::services::{BlockPipeline, ExplorerPipeline, ParserContext};

/// Lightweight pipeline: block row + filtered event dispatch only.
pub struct BlockSyncerPipeline {
    ctx: Arc<ParserContext>,
    /// Static inclusion map; events outside it are dropped here,
    /// before any module sees them.
    include: HashSet<&'static str>,
}

impl BlockSyncerPipeline {
    pub fn new(ctx: Arc<ParserContext>) -> Self {
        let include = ctx.registry.processed_event_types();
        Self { ctx, include }
    }

    #[instrument(skip(self))]
    async fn process_height(&self, height: u64) -> IndexerResult<DateTime<Utc>> {
        let block = self.ctx.source.block(height).await?;
        let results = self.ctx.source.block_results(height).await?;

        let total_gas = results.tx_results.iter().map(|r| r.gas_used).sum();
        self.ctx
            .repository
            .save_block(&Block {
                height: block.height,
                hash: BlockHash(block.hash),
                proposer: ConsAddress(block.proposer_address),
                timestamp: block.time,
                tx_count: results.tx_results.len() as u32,
                total_gas,
            })
            .await?;

        let registry = &self.ctx.registry;
        let modules = registry.event_modules_for_height(height).await;

        if !modules.is_empty() {
            for tx_result in &results.tx_results {
                let ctx = EventContext {
                    height: block.height,
                    block_hash: BlockHash(block.hash),
                    timestamp: block.time,
                    tx_hash: tx_result.tx_hash.clone(),
                };
                for event in &tx_result.events {
                    if !self.include.contains(event.type_url.as_str()) {
                        continue;
                    }
                    registry.dispatch_event(&modules, &ctx, event).await;
                }
            }
        } else {
            debug!(height, "All event modules already processed this height");
        }

        self.ctx
            .repository
            .save_epoch(&Epoch {
                height: block.height,
                block_hash: BlockHash(block.hash),
                updated_at: Utc::now(),
            })
            .await?;

        Ok(block.time)
    }
}

#[async_trait]
impl BlockPipeline for BlockSyncerPipeline {
    async fn process_block(&self, height: u64) -> IndexerResult<DateTime<Utc>> {
        if height == 0 {
            // Genesis takes the same path in both flavors.
            return ExplorerPipeline::new(self.ctx.clone()).process_genesis().await;
        }
        self.process_height(height).await
    }
}
