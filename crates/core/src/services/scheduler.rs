//! Wall-clock scheduler for module periodic operations.
//!
//! Modules register named jobs with a fixed interval at startup; each
//! job then runs in its own task until shutdown. Job errors are
//! logged and swallowed, like every other module hook.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::ModuleResult;

type JobFuture = Pin<Box<dyn Future<Output = ModuleResult<()>> + Send>>;
type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

struct PeriodicJob {
    name: String,
    interval: Duration,
    task: JobFn,
}

/// Collects periodic jobs during module registration, then spawns one
/// task per job.
#[derive(Default)]
pub struct PeriodicScheduler {
    jobs: Vec<PeriodicJob>,
}

impl PeriodicScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job that runs every `interval`.
    pub fn every<F, Fut>(&mut self, interval: Duration, name: impl Into<String>, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ModuleResult<()>> + Send + 'static,
    {
        let name = name.into();
        debug!(job = %name, interval_secs = interval.as_secs(), "Periodic job registered");
        self.jobs.push(PeriodicJob {
            name,
            interval,
            task: Arc::new(move || Box::pin(task()) as JobFuture),
        });
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Spawn every registered job in its own task. Jobs stop when the
    /// shutdown flag flips.
    pub fn spawn_all(self, shutdown: tokio::sync::watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        if !self.jobs.is_empty() {
            info!(jobs = self.jobs.len(), "Starting periodic scheduler");
        }

        self.jobs
            .into_iter()
            .map(|job| {
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(job.interval);
                    // The first tick fires immediately; skip it so jobs
                    // start one interval after boot.
                    ticker.tick().await;

                    loop {
                        tokio::select! {
                            _ = ticker.tick() => {
                                if let Err(e) = (job.task)().await {
                                    error!(job = %job.name, error = %e, "Periodic job failed");
                                }
                            }
                            _ = shutdown.changed() => {
                                if *shutdown.borrow() {
                                    debug!(job = %job.name, "Periodic job stopping");
                                    return;
                                }
                            }
                        }
                    }
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn jobs_fire_on_their_interval() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut scheduler = PeriodicScheduler::new();
        let c = counter.clone();
        scheduler.every(Duration::from_secs(10), "tick", move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let (tx, rx) = tokio::sync::watch::channel(false);
        let handles = scheduler.spawn_all(rx);

        tokio::time::sleep(Duration::from_secs(35)).await;
        tx.send(true).unwrap();
        for h in handles {
            let _ = h.await;
        }

        // Ticks at t=10, 20, 30.
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    // Test critique: une erreur de job est avalée et le job continue de
    // tourner au tick suivant
    #[tokio::test(start_paused = true)]
    async fn job_errors_do_not_stop_the_job() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut scheduler = PeriodicScheduler::new();
        let c = counter.clone();
        scheduler.every(Duration::from_secs(5), "flaky", move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(crate::error::ModuleError::Other("always fails".into()))
            }
        });

        let (tx, rx) = tokio::sync::watch::channel(false);
        let handles = scheduler.spawn_all(rx);

        tokio::time::sleep(Duration::from_secs(16)).await;
        tx.send(true).unwrap();
        for h in handles {
            let _ = h.await;
        }

        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
