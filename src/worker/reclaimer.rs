use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::backoff::RetryPolicy;
use crate::config::WorkerConfig;
use crate::error::QueueResult;
use crate::metrics::QueueMetrics;
use crate::store::JobStore;
use crate::worker::LoopHandle;

/// Recovers jobs abandoned by dead or hung workers.
///
/// A `Running` row whose lock has outlived the stale threshold is evidence
/// the owning worker is gone; there is no active cancellation signal, only
/// this post-hoc liveness check.
pub struct Reclaimer {
    store: Arc<dyn JobStore>,
    retry: Arc<RetryPolicy>,
    metrics: Arc<QueueMetrics>,
    sweep_interval: Duration,
    stale_after: chrono::Duration,
}

impl Reclaimer {
    pub fn new(
        store: Arc<dyn JobStore>,
        retry: Arc<RetryPolicy>,
        metrics: Arc<QueueMetrics>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            store,
            retry,
            metrics,
            sweep_interval: config.reclaim_interval,
            stale_after: chrono::Duration::from_std(config.stale_lock_timeout)
                .unwrap_or_else(|_| chrono::Duration::minutes(15)),
        }
    }

    /// Spawn the sweep loop.
    pub fn spawn(self) -> LoopHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let join_handle = tokio::spawn(async move {
            info!("reclaimer started");
            let mut ticker = interval(self.sweep_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once().await {
                            error!(error = %e, "stuck-job sweep failed");
                        }
                    }
                }
            }
            info!("reclaimer stopped");
        });
        LoopHandle::new(shutdown_tx, join_handle)
    }

    /// One sweep: reset every `Running` job whose lock has gone stale.
    ///
    /// `attempts` is left untouched: the next claim increments it, and
    /// incrementing here as well would double-count against the retry
    /// budget. The deferral is computed from the current attempt count.
    pub async fn sweep_once(&self) -> QueueResult<usize> {
        let cutoff = Utc::now() - self.stale_after;
        let stuck = self.store.find_stale_running(cutoff).await?;
        if stuck.is_empty() {
            debug!("no stale jobs found");
            return Ok(0);
        }

        warn!(count = stuck.len(), %cutoff, "reclaiming stuck jobs");
        let mut reclaimed = 0;
        for mut job in stuck {
            warn!(
                job_id = %job.id,
                job_type = %job.job_type,
                locked_by = ?job.locked_by,
                locked_at = ?job.locked_at,
                "reclaiming stuck job"
            );
            let now = Utc::now();
            let next = self.retry.next_attempt_at(now, job.attempts);
            job.release(next, now);
            self.store.update(&job).await?;
            self.metrics.record_reclaimed(job.job_type);
            reclaimed += 1;
        }
        Ok(reclaimed)
    }
}
