//! Scheduled operations and background tasks.
//!
//! Cron currently has one task: draining the entity usage queue. A run is
//! guarded so overlapping triggers (the periodic tick and `POST /cron/{key}`)
//! never process the queue concurrently.

mod queue;

pub use queue::{MemoryQueue, Queue};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::metrics::Metrics;
use crate::services::entity_usage::UsageWorker;

/// Result of a cron run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CronResult {
    /// Cron ran successfully.
    Completed {
        /// Tasks executed.
        tasks_run: Vec<String>,
        /// Duration of the run.
        duration_ms: u64,
    },
    /// Another run is in progress.
    Skipped,
    /// Cron failed with an error.
    Failed { error: String },
}

/// Last cron run information.
#[derive(Debug, Clone, Serialize)]
pub struct LastCronRun {
    pub timestamp: i64,
    pub result: CronResult,
}

/// Cron service for scheduled operations.
pub struct CronService {
    worker: Arc<UsageWorker>,
    metrics: Arc<Metrics>,
    batch_size: usize,
    running: AtomicBool,
    last_run: RwLock<Option<LastCronRun>>,
}

/// Clears the running flag when a run ends, including on early return.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl CronService {
    pub fn new(worker: Arc<UsageWorker>, metrics: Arc<Metrics>, batch_size: usize) -> Self {
        Self {
            worker,
            metrics,
            batch_size,
            running: AtomicBool::new(false),
            last_run: RwLock::new(None),
        }
    }

    /// Run all cron tasks.
    pub async fn run(&self) -> CronResult {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("cron already running, skipping");
            return CronResult::Skipped;
        }
        let _guard = RunGuard(&self.running);

        let start = std::time::Instant::now();
        let mut tasks_run = Vec::new();

        let result = match self.worker.drain(self.batch_size).await {
            Ok(summary) => {
                if summary.total() > 0 {
                    info!(
                        processed = summary.processed,
                        removed = summary.removed,
                        skipped = summary.skipped,
                        "processed entity usage queue"
                    );
                }
                self.metrics.record_usage_items(&summary);
                tasks_run.push(format!("entity_usage: {}", summary.total()));

                let duration_ms = start.elapsed().as_millis() as u64;
                debug!(duration_ms, tasks = ?tasks_run, "cron completed");
                CronResult::Completed {
                    tasks_run,
                    duration_ms,
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to process entity usage queue");
                CronResult::Failed {
                    error: e.to_string(),
                }
            }
        };

        *self.last_run.write() = Some(LastCronRun {
            timestamp: chrono::Utc::now().timestamp(),
            result: result.clone(),
        });
        result
    }

    /// Get the last cron run status.
    pub fn last_run(&self) -> Option<LastCronRun> {
        self.last_run.read().clone()
    }

    /// Run cron every `interval` until `shutdown` flips to true.
    pub async fn run_periodic(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_secs = interval.as_secs(), "cron scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("cron scheduler stopping");
                        break;
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for CronService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronService")
            .field("batch_size", &self.batch_size)
            .finish()
    }
}
