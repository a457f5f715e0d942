//! Bounded height queue feeding the worker pool.
//!
//! The queue is the single synchronization point between the
//! discovery producers and the workers: producers block on a full
//! queue (backpressure), workers block on an empty one. There is no
//! priority and no deduplication here; deduplication happens in the
//! worker via the repository's `has_block` check.
//!
//! The receiver side is shared behind a mutex so any number of
//! workers can drain the same queue. The queue closes once every
//! sender is dropped; workers then drain the buffer and exit.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::config::DEFAULT_QUEUE_SIZE;

/// Producer handle. Cheap to clone; dropping the last one closes the
/// queue.
#[derive(Clone)]
pub struct HeightSender {
    tx: mpsc::Sender<u64>,
}

impl HeightSender {
    /// Enqueue a height, waiting while the queue is full.
    /// Returns `false` if the queue was closed.
    pub async fn send(&self, height: u64) -> bool {
        self.tx.send(height).await.is_ok()
    }
}

/// Consumer side of the height queue, shared by the worker pool.
#[derive(Clone)]
pub struct HeightQueue {
    rx: Arc<Mutex<mpsc::Receiver<u64>>>,
}

impl HeightQueue {
    /// Create a queue with the given capacity.
    pub fn new(capacity: usize) -> (Self, HeightSender) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                rx: Arc::new(Mutex::new(rx)),
            },
            HeightSender { tx },
        )
    }

    /// Create a queue with the default capacity (25).
    pub fn with_default_capacity() -> (Self, HeightSender) {
        Self::new(DEFAULT_QUEUE_SIZE)
    }

    /// Dequeue the next height. `None` means the queue is closed and
    /// drained: the worker should exit.
    pub async fn recv(&self) -> Option<u64> {
        self.rx.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_order_within_one_producer() {
        let (queue, sender) = HeightQueue::new(5);
        for h in [3u64, 1, 2] {
            assert!(sender.send(h).await);
        }
        drop(sender);

        assert_eq!(queue.recv().await, Some(3));
        assert_eq!(queue.recv().await, Some(1));
        assert_eq!(queue.recv().await, Some(2));
        assert_eq!(queue.recv().await, None);
    }

    // Test critique: la fermeture de la queue draine le buffer avant de
    // signaler la fin aux workers
    #[tokio::test]
    async fn close_drains_before_none() {
        let (queue, sender) = HeightQueue::new(5);
        sender.send(7).await;
        drop(sender);

        assert_eq!(queue.recv().await, Some(7));
        assert_eq!(queue.recv().await, None);
    }

    // Test critique: backpressure - un producteur bloque quand la queue
    // est pleine jusqu'à ce qu'un worker consomme
    #[tokio::test]
    async fn producer_blocks_when_full() {
        let (queue, sender) = HeightQueue::new(1);
        assert!(sender.send(1).await);

        let pending = {
            let sender = sender.clone();
            tokio::spawn(async move { sender.send(2).await })
        };

        // The second send cannot complete until we consume.
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        assert_eq!(queue.recv().await, Some(1));
        assert!(pending.await.unwrap());
        assert_eq!(queue.recv().await, Some(2));
    }

    #[tokio::test]
    async fn multiple_consumers_share_the_queue() {
        let (queue, sender) = HeightQueue::new(10);
        for h in 0u64..6 {
            sender.send(h).await;
        }
        drop(sender);

        let q2 = queue.clone();
        let a = tokio::spawn(async move {
            let mut seen = vec![];
            while let Some(h) = queue.recv().await {
                seen.push(h);
            }
            seen
        });
        let b = tokio::spawn(async move {
            let mut seen = vec![];
            while let Some(h) = q2.recv().await {
                seen.push(h);
            }
            seen
        });

        let mut all: Vec<u64> = a.await.unwrap();
        all.extend(b.await.unwrap());
        all.sort_unstable();
        assert_eq!(all, vec![0, 1, 2, 3, 4, 5]);
    }
}
