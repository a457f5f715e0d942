//! Discovery producers: backfill and tip.
//!
//! Both producers feed the shared height queue. The backfill producer
//! runs once and enqueues every height missing from the repository in
//! `[start, tip]`; the tip producer subscribes to the node's
//! new-block stream and enqueues each arriving height, reconnecting
//! with bounded exponential backoff when the subscription drops.
//!
//! Heights are monotonic within each producer; across producers there
//! is no ordering guarantee and workers must tolerate that.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::error::IndexerResult;
use crate::services::{HeightSender, ParserContext};

/// Reconnect backoff cap, as a multiple of the average block time.
const MAX_BACKOFF_MULTIPLIER: u32 = 60;

/// Enqueue every height missing from the repository.
///
/// The scan starts at the configured `start_height` (or just past the
/// last exported height when `fast_sync` skips deep history) and ends
/// at the node's current tip. Failure aborts the backfill but leaves
/// the tip producer untouched.
pub async fn enqueue_missing_blocks(
    ctx: Arc<ParserContext>,
    sender: HeightSender,
) -> IndexerResult<()> {
    let tip = ctx.source.latest_height().await?;

    let start = if ctx.parsing.fast_sync {
        let last = ctx.repository.last_block_height().await?;
        last.map(|h| h + 1).unwrap_or(ctx.parsing.start_height)
    } else {
        ctx.parsing.start_height
    };

    if start > tip {
        debug!(start, tip, "Nothing to backfill");
        return Ok(());
    }

    let missing = ctx.repository.missing_heights(start, tip).await?;
    info!(start, tip, missing = missing.len(), "Backfilling missing heights");

    for height in missing {
        if !sender.send(height).await {
            debug!("Height queue closed, stopping backfill");
            break;
        }
    }

    Ok(())
}

/// Enqueue every height in `[from, to]` missing from the repository.
/// Used by the one-shot `parse blocks missing` command.
pub async fn enqueue_missing_range(
    ctx: Arc<ParserContext>,
    sender: HeightSender,
    from: u64,
    to: u64,
) -> IndexerResult<()> {
    let missing = ctx.repository.missing_heights(from, to).await?;
    info!(from, to, missing = missing.len(), "Enqueueing missing heights");

    for height in missing {
        if !sender.send(height).await {
            break;
        }
    }
    Ok(())
}

/// Follow the tip: subscribe to new-block notifications and enqueue
/// each height, reconnecting on drop.
///
/// When `parse_genesis` is set and the repository is still empty,
/// height 0 is enqueued first so the genesis path runs before any
/// tip block.
pub async fn listen_new_blocks(
    ctx: Arc<ParserContext>,
    sender: HeightSender,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> IndexerResult<()> {
    if ctx.parsing.parse_genesis && ctx.repository.total_blocks().await? == 0 {
        info!("Empty repository with parse_genesis set, enqueueing height 0");
        sender.send(0).await;
    }

    let base_delay = ctx.parsing.average_block_time();
    let max_delay = base_delay * MAX_BACKOFF_MULTIPLIER;
    let mut retry_delay = base_delay;

    loop {
        if *shutdown.borrow() {
            debug!("Shutdown requested, stopping tip producer");
            return Ok(());
        }

        match ctx.source.subscribe_new_blocks().await {
            Ok(mut stream) => {
                debug!("New-block subscription established");
                retry_delay = base_delay; // Reset backoff on success

                loop {
                    tokio::select! {
                        item = stream.next() => match item {
                            Some(Ok(notice)) => {
                                if !sender.send(notice.height).await {
                                    debug!("Height queue closed, stopping tip producer");
                                    return Ok(());
                                }
                            }
                            Some(Err(e)) => {
                                warn!(error = %e, "Subscription error, reconnecting");
                                break;
                            }
                            None => {
                                warn!("Subscription stream ended, reconnecting");
                                break;
                            }
                        },
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                return Ok(());
                            }
                        }
                    }
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    retry_in_secs = retry_delay.as_secs(),
                    "Failed to subscribe, retrying"
                );
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(retry_delay) => {
                // Exponential backoff: double the delay, up to the cap
                retry_delay = (retry_delay * 2).min(max_delay);
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::HeightQueue;
    use crate::testing::{FakeRepository, FakeSource, TestContextBuilder};

    #[tokio::test]
    async fn backfill_enqueues_missing_ascending() {
        // DB has {100, 102}, tip = 104 -> missing = {101, 103, 104}
        let repo = FakeRepository::with_heights(&[100, 102]);
        let source = FakeSource::new().with_tip(104);
        let ctx = TestContextBuilder::new()
            .start_height(100)
            .repository(repo)
            .source(source)
            .build();

        let (queue, sender) = HeightQueue::new(25);
        enqueue_missing_blocks(ctx, sender).await.unwrap();

        let mut seen = vec![];
        while let Some(h) = queue.recv().await {
            seen.push(h);
        }
        assert_eq!(seen, vec![101, 103, 104]);
    }

    #[tokio::test]
    async fn backfill_empty_db_enqueues_full_range() {
        let repo = FakeRepository::default();
        let source = FakeSource::new().with_tip(105);
        let ctx = TestContextBuilder::new()
            .start_height(100)
            .repository(repo)
            .source(source)
            .build();

        let (queue, sender) = HeightQueue::new(25);
        enqueue_missing_blocks(ctx, sender).await.unwrap();

        let mut seen = vec![];
        while let Some(h) = queue.recv().await {
            seen.push(h);
        }
        assert_eq!(seen, vec![100, 101, 102, 103, 104, 105]);
    }

    // Test critique: parse_genesis + base vide => la hauteur 0 passe en
    // tête de queue avant tout bloc du tip
    #[tokio::test]
    async fn tip_producer_enqueues_genesis_first_when_db_empty() {
        let repo = FakeRepository::default();
        let source = FakeSource::new().with_tip(10).with_new_blocks(&[10, 11]);
        let ctx = TestContextBuilder::new()
            .parse_genesis(true)
            .repository(repo)
            .source(source)
            .build();

        let (queue, sender) = HeightQueue::new(25);
        let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        // The fake stream ends after its notices; a closed queue stops
        // the reconnect loop, so drop our handle and drain.
        let handle = tokio::spawn(listen_new_blocks(ctx, sender, shutdown_rx));

        assert_eq!(queue.recv().await, Some(0));
        assert_eq!(queue.recv().await, Some(10));
        assert_eq!(queue.recv().await, Some(11));
        handle.abort();
    }
}
