//! Height queue consumer.
//!
//! A worker drains heights from the shared queue and runs the
//! configured pipeline for each. Operations for one height are
//! strictly serial; the next height is not started until the current
//! one completes or is handed back for retry.
//!
//! Failure handling depends on `concurrent_sync`:
//! - concurrent: the height is re-enqueued from a spawned task so the
//!   drain loop never blocks;
//! - sequential: the worker retries in place with exponential backoff
//!   (base = average block time, capped at 60x) until it succeeds or
//!   shutdown is requested.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::metrics::{
    record_block_skipped, record_worker_last_height, record_worker_latency,
};
use crate::services::{BlockPipeline, HeightQueue, HeightSender, ParserContext};

/// Reconnect/retry backoff cap, as a multiple of the average block time.
const MAX_BACKOFF_MULTIPLIER: u32 = 60;

/// One queue consumer.
pub struct Worker {
    index: usize,
    ctx: Arc<ParserContext>,
    pipeline: Arc<dyn BlockPipeline>,
    queue: HeightQueue,
    /// Present only in concurrent mode; used to hand failed heights
    /// back to the queue. Sequential workers hold no sender so the
    /// queue can close once the producers are done.
    reenqueue: Option<HeightSender>,
}

impl Worker {
    pub fn new(
        index: usize,
        ctx: Arc<ParserContext>,
        pipeline: Arc<dyn BlockPipeline>,
        queue: HeightQueue,
        reenqueue: Option<HeightSender>,
    ) -> Self {
        Self {
            index,
            ctx,
            pipeline,
            queue,
            reenqueue,
        }
    }

    /// Drain the queue until it closes or shutdown is signaled.
    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        debug!(worker = self.index, "Worker started");

        loop {
            let height = tokio::select! {
                height = self.queue.recv() => match height {
                    Some(h) => h,
                    None => {
                        debug!(worker = self.index, "Height queue closed, worker exiting");
                        return;
                    }
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!(worker = self.index, "Shutdown requested, worker exiting");
                        return;
                    }
                    continue;
                }
            };

            self.process(height, &mut shutdown).await;
        }
    }

    async fn process(&self, height: u64, shutdown: &mut tokio::sync::watch::Receiver<bool>) {
        // Dedup here rather than at the queue: both producers may have
        // enqueued the same height.
        match self.ctx.repository.has_block(height).await {
            Ok(true) => {
                debug!(worker = self.index, height, "Block already present, skipping");
                record_block_skipped();
                return;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(worker = self.index, height, error = %e, "has_block check failed");
            }
        }

        match self.pipeline.process_block(height).await {
            Ok(block_time) => {
                self.publish_success(height, block_time);
            }
            Err(e) => match &self.reenqueue {
                Some(sender) => {
                    error!(worker = self.index, height, error = %e, "Processing failed, re-enqueueing");
                    let sender = sender.clone();
                    // Hand the height back from a detached task so a
                    // full queue never blocks this worker's drain loop.
                    tokio::spawn(async move {
                        sender.send(height).await;
                    });
                }
                None => self.retry_in_place(height, e, shutdown).await,
            },
        }
    }

    /// Sequential-mode retry: block this worker on the failed height
    /// with capped exponential backoff until it succeeds or shutdown.
    async fn retry_in_place(
        &self,
        height: u64,
        first_err: crate::error::IndexerError,
        shutdown: &mut tokio::sync::watch::Receiver<bool>,
    ) {
        let base = self.ctx.parsing.average_block_time();
        let max = base * MAX_BACKOFF_MULTIPLIER;
        let mut delay = base;

        error!(
            worker = self.index,
            height,
            error = %first_err,
            retry_in_secs = delay.as_secs(),
            "Processing failed, retrying in place"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        warn!(worker = self.index, height, "Shutdown during retry, abandoning height");
                        return;
                    }
                }
            }

            match self.pipeline.process_block(height).await {
                Ok(block_time) => {
                    info!(worker = self.index, height, "Retry succeeded");
                    self.publish_success(height, block_time);
                    return;
                }
                Err(e) => {
                    delay = (delay * 2).min(max);
                    error!(
                        worker = self.index,
                        height,
                        error = %e,
                        retry_in_secs = delay.as_secs(),
                        "Retry failed"
                    );
                }
            }
        }
    }

    fn publish_success(&self, height: u64, block_time: chrono::DateTime<Utc>) {
        record_worker_last_height(self.index, &self.ctx.chain_id, height);
        let lag = (Utc::now() - block_time).num_milliseconds().max(0) as f64 / 1000.0;
        record_worker_latency(lag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{IndexerError, IndexerResult};
    use crate::services::HeightQueue;
    use crate::testing::{FakeRepository, FakeSource, TestContextBuilder};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Pipeline fake: fails the first `failures[h]` attempts for h.
    struct FlakyPipeline {
        attempts: Mutex<HashMap<u64, usize>>,
        failures: HashMap<u64, usize>,
        processed: Mutex<Vec<u64>>,
    }

    impl FlakyPipeline {
        fn new(failures: HashMap<u64, usize>) -> Arc<Self> {
            Arc::new(Self {
                attempts: Mutex::new(HashMap::new()),
                failures,
                processed: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl BlockPipeline for FlakyPipeline {
        async fn process_block(&self, height: u64) -> IndexerResult<chrono::DateTime<Utc>> {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(height).or_insert(0);
            *n += 1;
            if *n <= self.failures.get(&height).copied().unwrap_or(0) {
                return Err(IndexerError::Internal("transient".into()));
            }
            self.processed.lock().unwrap().push(height);
            Ok(Utc::now())
        }
    }

    #[tokio::test]
    async fn worker_drains_and_exits_on_queue_close() {
        let ctx = TestContextBuilder::new()
            .repository(FakeRepository::default())
            .source(FakeSource::new())
            .build();
        let pipeline = FlakyPipeline::new(HashMap::new());
        let (queue, sender) = HeightQueue::new(25);
        for h in 1u64..=3 {
            sender.send(h).await;
        }
        drop(sender);

        let (_tx, shutdown) = tokio::sync::watch::channel(false);
        Worker::new(0, ctx, pipeline.clone(), queue, None)
            .run(shutdown)
            .await;

        assert_eq!(*pipeline.processed.lock().unwrap(), vec![1, 2, 3]);
    }

    // Test critique: une hauteur déjà en base est sautée sans invoquer
    // le pipeline
    #[tokio::test]
    async fn worker_skips_heights_already_present() {
        let ctx = TestContextBuilder::new()
            .repository(FakeRepository::with_heights(&[2]))
            .source(FakeSource::new())
            .build();
        let pipeline = FlakyPipeline::new(HashMap::new());
        let (queue, sender) = HeightQueue::new(25);
        for h in [1u64, 2, 3] {
            sender.send(h).await;
        }
        drop(sender);

        let (_tx, shutdown) = tokio::sync::watch::channel(false);
        Worker::new(0, ctx, pipeline.clone(), queue, None)
            .run(shutdown)
            .await;

        assert_eq!(*pipeline.processed.lock().unwrap(), vec![1, 3]);
    }

    // Test critique: concurrent_sync - l'échec ré-enfile la hauteur et
    // elle finit par passer exactement une fois
    #[tokio::test]
    async fn concurrent_failure_reenqueues_until_success() {
        let ctx = TestContextBuilder::new()
            .concurrent_sync(true)
            .repository(FakeRepository::default())
            .source(FakeSource::new())
            .build();

        let pipeline = FlakyPipeline::new(HashMap::from([(7u64, 1)]));
        let (queue, sender) = HeightQueue::new(25);
        sender.send(7).await;

        let (_tx, shutdown) = tokio::sync::watch::channel(false);
        let worker = Worker::new(0, ctx, pipeline.clone(), queue, Some(sender.clone()));
        let handle = tokio::spawn(worker.run(shutdown));

        // Wait until the retry lands.
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            if pipeline.processed.lock().unwrap().contains(&7) {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "height 7 never processed");
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        assert_eq!(*pipeline.processed.lock().unwrap(), vec![7]);
        // The worker keeps its re-enqueue sender alive, so the queue
        // never closes in concurrent mode; stop it explicitly.
        handle.abort();
    }

    // Test critique: mode séquentiel - retry sur place avec backoff
    #[tokio::test(start_paused = true)]
    async fn sequential_failure_retries_in_place() {
        let ctx = TestContextBuilder::new()
            .average_block_time(1)
            .repository(FakeRepository::default())
            .source(FakeSource::new())
            .build();

        let pipeline = FlakyPipeline::new(HashMap::from([(5u64, 2)]));
        let (queue, sender) = HeightQueue::new(25);
        sender.send(5).await;
        drop(sender);

        let (_tx, shutdown) = tokio::sync::watch::channel(false);
        Worker::new(0, ctx, pipeline.clone(), queue, None)
            .run(shutdown)
            .await;

        // Two failures then success, all on the same worker.
        assert_eq!(*pipeline.processed.lock().unwrap(), vec![5]);
        assert_eq!(
            pipeline.attempts.lock().unwrap().get(&5).copied(),
            Some(3)
        );
    }
}
