use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Semaphore};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::WorkerConfig;
use crate::metrics::QueueMetrics;
use crate::store::JobStore;
use crate::types::{JobId, WorkerId};
use crate::worker::{JobExecutor, LoopHandle};

/// Claim-and-dispatch loop for one worker process.
///
/// Each tick is a short claim call against the store, committed immediately
/// and independently of execution so claimed rows are visible to monitoring
/// right away, followed by dispatch of each claimed ID as its own task.
pub struct Scheduler {
    store: Arc<dyn JobStore>,
    executor: Arc<JobExecutor>,
    metrics: Arc<QueueMetrics>,
    worker_id: WorkerId,
    batch_size: usize,
    poll_interval: Duration,
    /// Execution permits: at most `workers` jobs run at once.
    permits: Arc<Semaphore>,
    /// Admission slots: `workers + queue_depth` dispatched-but-unfinished
    /// jobs. Beyond that the polling task runs jobs itself.
    slots: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        executor: Arc<JobExecutor>,
        metrics: Arc<QueueMetrics>,
        config: &WorkerConfig,
        worker_id: WorkerId,
    ) -> Self {
        Self {
            store,
            executor,
            metrics,
            worker_id,
            batch_size: config.batch_size,
            poll_interval: config.poll_interval,
            permits: Arc::new(Semaphore::new(config.workers)),
            slots: Arc::new(Semaphore::new(config.workers + config.queue_depth)),
        }
    }

    /// Spawn the poll loop.
    pub fn spawn(self) -> LoopHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let join_handle = tokio::spawn(async move {
            info!(worker_id = %self.worker_id, "scheduler started");
            let mut ticker = interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => self.poll_once().await,
                }
            }
            info!(worker_id = %self.worker_id, "scheduler stopped");
        });
        LoopHandle::new(shutdown_tx, join_handle)
    }

    /// One poll cycle. Any error is contained and logged here; the loop
    /// never halts because a single cycle went wrong.
    pub async fn poll_once(&self) {
        let ids = match self.store.claim(&self.worker_id, self.batch_size).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(worker_id = %self.worker_id, error = %e, "claim poll failed");
                return;
            }
        };
        if ids.is_empty() {
            return;
        }
        debug!(worker_id = %self.worker_id, count = ids.len(), "claimed jobs");
        self.metrics.record_claimed(ids.len());
        for id in ids {
            self.dispatch(id).await;
        }
    }

    /// Submit one claimed job to the pool. With no admission slot free, the
    /// polling task executes the job itself: backpressure instead of an
    /// unbounded queue or dropped work.
    async fn dispatch(&self, id: JobId) {
        match self.slots.clone().try_acquire_owned() {
            Ok(slot) => {
                let executor = self.executor.clone();
                let permits = self.permits.clone();
                tokio::spawn(async move {
                    if let Ok(_permit) = permits.acquire_owned().await {
                        executor.execute(id).await;
                    }
                    drop(slot);
                });
            }
            Err(_) => {
                debug!(job_id = %id, "execution pool saturated, running inline");
                self.executor.execute(id).await;
            }
        }
    }
}
