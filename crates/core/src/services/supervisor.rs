//! Lifecycle supervisor.
//!
//! Owns start and stop of the whole ingestion engine: discovery
//! producers, the worker pool, the periodic scheduler and the module
//! async tasks. On shutdown it stops the producers (closing the
//! height queue), waits for workers to drain in-flight heights, then
//! closes the repository.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::WorkerType;
use crate::error::{IndexerError, IndexerResult};
use crate::metrics::record_worker_count;
use crate::services::{
    producer, BlockPipeline, BlockSyncerPipeline, ExplorerPipeline, HeightQueue,
    ParserContext, PeriodicScheduler, Worker,
};

/// Starts and stops every ingestion task.
pub struct Supervisor {
    ctx: Arc<ParserContext>,
}

impl Supervisor {
    pub fn new(ctx: Arc<ParserContext>) -> Self {
        Self { ctx }
    }

    fn build_pipeline(&self) -> Arc<dyn BlockPipeline> {
        match self.ctx.parsing.worker_type {
            WorkerType::Explorer => Arc::new(ExplorerPipeline::new(self.ctx.clone())),
            WorkerType::BlockSyncer => Arc::new(BlockSyncerPipeline::new(self.ctx.clone())),
        }
    }

    /// Run the full engine until the shutdown flag flips or, when no
    /// tip producer is configured, until the backfill drains.
    pub async fn start(
        &self,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> IndexerResult<()> {
        let ctx = &self.ctx;
        let parsing = &ctx.parsing;

        let pipeline = self.build_pipeline();
        let (queue, sender) = HeightQueue::with_default_capacity();

        let mut producer_handles: Vec<JoinHandle<()>> = Vec::new();

        // Workers start first: the bounded queue backpressures the
        // producers, so there must be consumers before any backfill.
        // Concurrent mode hands each worker a sender so it can
        // re-enqueue failed heights.
        let reenqueue = parsing.concurrent_sync.then(|| sender.clone());
        let mut worker_handles = Vec::with_capacity(parsing.workers);
        for index in 0..parsing.workers {
            let worker = Worker::new(
                index,
                ctx.clone(),
                pipeline.clone(),
                queue.clone(),
                reenqueue.clone(),
            );
            worker_handles.push(tokio::spawn(worker.run(shutdown.clone())));
        }
        record_worker_count(parsing.workers);
        info!(
            workers = parsing.workers,
            worker_type = ?parsing.worker_type,
            chain_id = %ctx.chain_id,
            "Ingestion started"
        );

        // Backfill: awaited here unless concurrent_sync, so sequential
        // deployments finish enqueueing history before the tip stream
        // starts interleaving.
        if parsing.parse_old_blocks {
            if parsing.concurrent_sync {
                let ctx = ctx.clone();
                let sender = sender.clone();
                producer_handles.push(tokio::spawn(async move {
                    if let Err(e) = producer::enqueue_missing_blocks(ctx, sender).await {
                        // The tip producer keeps running regardless.
                        error!(error = %e, "Backfill failed");
                    }
                }));
            } else if let Err(e) =
                producer::enqueue_missing_blocks(ctx.clone(), sender.clone()).await
            {
                error!(error = %e, "Backfill failed");
            }
        }

        if parsing.listen_new_blocks {
            let ctx = ctx.clone();
            let sender = sender.clone();
            let shutdown = shutdown.clone();
            producer_handles.push(tokio::spawn(async move {
                if let Err(e) = producer::listen_new_blocks(ctx, sender, shutdown).await {
                    error!(error = %e, "Tip producer failed");
                }
            }));
        }

        // Periodic jobs and module async tasks.
        let mut scheduler = PeriodicScheduler::new();
        ctx.registry.register_periodic_operations(&mut scheduler);
        let mut aux_handles = scheduler.spawn_all(shutdown.clone());

        for module in ctx.registry.async_modules() {
            let shutdown = shutdown.clone();
            let name = module.name();
            aux_handles.push(tokio::spawn(async move {
                if let Some(ops) = module.async_operations() {
                    if let Err(e) = ops.run_async(shutdown).await {
                        error!(module = name, error = %e, "Async operation failed");
                    }
                }
            }));
        }

        // Our own sender copy would keep the queue open forever.
        drop(sender);

        // Wait for the pool to drain. With a tip producer this only
        // happens after shutdown is signaled.
        for handle in worker_handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker task panicked");
            }
        }
        debug!("Worker pool drained");

        for handle in producer_handles.into_iter().chain(aux_handles) {
            handle.abort();
        }

        self.ctx.repository.close().await;
        info!("Ingestion stopped");
        Ok(())
    }

    /// One-shot backfill: enqueue heights missing from `[start, last
    /// exported]` and drain them with a single sequential worker. No
    /// tip subscription.
    pub async fn parse_missing_blocks(&self, start: u64) -> IndexerResult<()> {
        let last = match self.ctx.repository.last_block_height().await? {
            Some(h) => h,
            None => {
                warn!("Repository is empty, nothing to backfill");
                return Ok(());
            }
        };
        if start > last {
            return Err(IndexerError::Config(format!(
                "start height {} is beyond the last exported height {}",
                start, last
            )));
        }

        let pipeline = self.build_pipeline();
        let (queue, sender) = HeightQueue::with_default_capacity();

        let producer = tokio::spawn(producer::enqueue_missing_range(
            self.ctx.clone(),
            sender,
            start,
            last,
        ));

        let (_tx, shutdown) = tokio::sync::watch::channel(false);
        Worker::new(0, self.ctx.clone(), pipeline, queue, None)
            .run(shutdown)
            .await;

        producer
            .await
            .map_err(|e| IndexerError::Internal(e.to_string()))??;
        info!(start, last, "Missing-block backfill finished");
        Ok(())
    }

    /// One-shot re-fetch of transactions for the closed range
    /// `[start, end]`.
    pub async fn reparse_transactions(&self, start: u64, end: Option<u64>) -> IndexerResult<()> {
        let end = match end {
            Some(h) => h,
            None => self.ctx.source.latest_height().await?,
        };
        if start > end {
            return Err(IndexerError::Config(format!(
                "invalid range: start {} > end {}",
                start, end
            )));
        }

        let pipeline = ExplorerPipeline::new(self.ctx.clone());
        info!(start, end, "Re-parsing transactions");

        for height in start..=end {
            let block = self.ctx.source.block(height).await?;
            let txs = self.ctx.source.txs(&block).await?;
            pipeline.export_txs(&txs).await?;
            if height % 1000 == 0 {
                debug!(height, "Re-parse progress");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParsingConfig;
    use crate::testing::{FakeRepository, FakeSource, TestContextBuilder};

    fn parsing(workers: usize) -> ParsingConfig {
        ParsingConfig {
            workers,
            start_height: 100,
            listen_new_blocks: false,
            parse_old_blocks: true,
            ..Default::default()
        }
    }

    // Test critique: scénario bout-en-bout - base vide, start=100,
    // tip=105, pas de tip producer => 100..=105 présents et les workers
    // sortent à la fermeture de la queue
    #[tokio::test]
    async fn backfill_only_run_drains_and_exits() {
        let repo = FakeRepository::default();
        let ctx = TestContextBuilder::new()
            .parsing(parsing(2))
            .repository(repo.clone())
            .source(FakeSource::new().with_tip(105))
            .build();

        let (_tx, shutdown) = tokio::sync::watch::channel(false);
        Supervisor::new(ctx).start(shutdown).await.unwrap();

        for h in 100..=105 {
            assert!(repo.block(h).is_some(), "height {} missing", h);
        }
        assert_eq!(repo.block_count(), 6);
    }

    // Test critique: les trous sont comblés - base avec {100,102},
    // tip=104 => l'ensemble manquant {101,103,104} est traité
    #[tokio::test]
    async fn gaps_are_backfilled() {
        let repo = FakeRepository::with_heights(&[100, 102]);
        let ctx = TestContextBuilder::new()
            .parsing(parsing(1))
            .repository(repo.clone())
            .source(FakeSource::new().with_tip(104))
            .build();

        let (_tx, shutdown) = tokio::sync::watch::channel(false);
        Supervisor::new(ctx).start(shutdown).await.unwrap();

        for h in 100..=104 {
            assert!(repo.block(h).is_some(), "height {} missing", h);
        }
    }

    // Test critique: un backlog plus grand que la capacité de la queue
    // (25) ne bloque pas - les workers consomment pendant l'enqueue
    #[tokio::test]
    async fn backlog_larger_than_queue_capacity_drains() {
        let repo = FakeRepository::default();
        let ctx = TestContextBuilder::new()
            .parsing(parsing(2))
            .repository(repo.clone())
            .source(FakeSource::new().with_tip(140))
            .build();

        let (_tx, shutdown) = tokio::sync::watch::channel(false);
        Supervisor::new(ctx).start(shutdown).await.unwrap();

        assert_eq!(repo.block_count(), 41);
    }

    #[tokio::test]
    async fn parse_missing_blocks_respects_last_exported() {
        let repo = FakeRepository::with_heights(&[100, 103]);
        let ctx = TestContextBuilder::new()
            .parsing(parsing(1))
            .repository(repo.clone())
            .source(FakeSource::new().with_tip(200))
            .build();

        Supervisor::new(ctx).parse_missing_blocks(100).await.unwrap();

        // Fills up to the last exported height (103), not the tip.
        assert!(repo.block(101).is_some());
        assert!(repo.block(102).is_some());
        assert!(repo.block(104).is_none());
    }
}
