mod executor;
mod reclaimer;
mod scheduler;

pub use executor::JobExecutor;
pub use reclaimer::Reclaimer;
pub use scheduler::Scheduler;

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::backoff::RetryPolicy;
use crate::config::WorkerConfig;
use crate::handler::HandlerRegistry;
use crate::metrics::QueueMetrics;
use crate::store::JobStore;
use crate::types::WorkerId;

/// Handle for one background loop.
pub struct LoopHandle {
    shutdown_tx: oneshot::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl LoopHandle {
    pub(crate) fn new(shutdown_tx: oneshot::Sender<()>, join_handle: JoinHandle<()>) -> Self {
        Self {
            shutdown_tx,
            join_handle,
        }
    }

    /// Signal the loop and wait for it to finish its current cycle.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.join_handle.await {
            error!(error = %e, "background loop panicked");
        }
    }
}

/// One worker process over a shared store: a scheduler loop claiming and
/// executing jobs, and a reclaimer loop recovering abandoned ones.
///
/// Any number of workers (with distinct [`WorkerId`]s) may run against the
/// same store; the claim protocol is their only coordination.
pub struct QueueWorker {
    store: Arc<dyn JobStore>,
    handlers: Arc<HandlerRegistry>,
    retry: Arc<RetryPolicy>,
    metrics: Arc<QueueMetrics>,
    config: WorkerConfig,
}

impl QueueWorker {
    pub fn new(
        store: Arc<dyn JobStore>,
        handlers: Arc<HandlerRegistry>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            handlers,
            retry: Arc::new(RetryPolicy::new()),
            metrics: Arc::new(QueueMetrics::new()),
            config,
        }
    }

    pub fn with_retry_policy(mut self, retry: Arc<RetryPolicy>) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<QueueMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> Arc<QueueMetrics> {
        self.metrics.clone()
    }

    /// Start the scheduler and reclaimer loops under the given identity.
    pub fn start(self, worker_id: WorkerId) -> WorkerHandle {
        let executor = Arc::new(JobExecutor::new(
            self.store.clone(),
            self.handlers.clone(),
            self.retry.clone(),
            self.metrics.clone(),
            self.config.max_attempts,
        ));
        let scheduler = Scheduler::new(
            self.store.clone(),
            executor,
            self.metrics.clone(),
            &self.config,
            worker_id.clone(),
        );
        let reclaimer = Reclaimer::new(self.store, self.retry, self.metrics, &self.config);

        info!(%worker_id, "queue worker started");
        WorkerHandle {
            scheduler: scheduler.spawn(),
            reclaimer: reclaimer.spawn(),
        }
    }
}

/// Shutdown handle for a running [`QueueWorker`]. In-flight executions
/// finish their current job; nothing new is claimed afterwards.
pub struct WorkerHandle {
    scheduler: LoopHandle,
    reclaimer: LoopHandle,
}

impl WorkerHandle {
    pub async fn shutdown(self) {
        self.scheduler.shutdown().await;
        self.reclaimer.shutdown().await;
    }
}
