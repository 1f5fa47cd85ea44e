use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;
use tracing::{error, info, warn};

use crate::backoff::RetryPolicy;
use crate::error::HandlerError;
use crate::handler::HandlerRegistry;
use crate::metrics::{Outcome, QueueMetrics};
use crate::store::JobStore;
use crate::types::{JobId, JobRecord};

/// Executes one claimed job in its own isolated unit of work.
///
/// Every store round-trip here is independent of the claim transaction
/// (already committed) and of other jobs from the same batch: one job's
/// failure can never roll back another's.
pub struct JobExecutor {
    store: Arc<dyn JobStore>,
    handlers: Arc<HandlerRegistry>,
    retry: Arc<RetryPolicy>,
    metrics: Arc<QueueMetrics>,
    max_attempts: u32,
}

impl JobExecutor {
    pub fn new(
        store: Arc<dyn JobStore>,
        handlers: Arc<HandlerRegistry>,
        retry: Arc<RetryPolicy>,
        metrics: Arc<QueueMetrics>,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            handlers,
            retry,
            metrics,
            max_attempts,
        }
    }

    /// Run a claimed job to a terminal or requeued state.
    ///
    /// Fully self-contained: failures are persisted on the row and never
    /// propagate to the scheduler.
    pub async fn execute(&self, job_id: JobId) {
        let mut job = match self.store.get(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                error!(%job_id, "claimed job missing from store");
                return;
            }
            Err(e) => {
                error!(%job_id, error = %e, "failed to fetch claimed job");
                return;
            }
        };

        // Effective retry budget comes from config, allowing per-environment
        // tuning over the stored row value.
        job.max_attempts = self.max_attempts;

        info!(
            %job_id,
            job_type = %job.job_type,
            file_id = %job.file_id,
            attempt = job.attempts,
            max_attempts = job.max_attempts,
            "executing job"
        );

        let handler = match self.handlers.resolve(&job) {
            Some(handler) => handler,
            None => {
                // Deployment gap, not a transient failure: no retry.
                error!(
                    %job_id,
                    job_type = %job.job_type,
                    "no handler registered for job type, dead-lettering; operator fix required"
                );
                let err = HandlerError::with_code(
                    "NO_HANDLER",
                    format!("no handler registered for job type {}", job.job_type),
                );
                self.dead_letter(&mut job, &err, "configuration").await;
                return;
            }
        };

        let started = Instant::now();
        match handler.execute(&job).await {
            Ok(output) => {
                job.complete(output, Utc::now());
                if let Err(e) = self.store.update(&job).await {
                    error!(%job_id, error = %e, "failed to persist job completion");
                    return;
                }
                info!(
                    %job_id,
                    job_type = %job.job_type,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "job completed"
                );
                self.metrics.record_completed(job.job_type, Outcome::Success);
            }
            Err(err) => {
                error!(%job_id, job_type = %job.job_type, error = %err, "job failed");
                self.handle_failure(&mut job, &err).await;
                self.metrics.record_completed(job.job_type, Outcome::Failure);
            }
        }
    }

    /// `attempts` was already incremented by the claim; never increment here.
    async fn handle_failure(&self, job: &mut JobRecord, err: &HandlerError) {
        let now = Utc::now();
        if job.has_remaining_attempts() {
            let next = self.retry.next_attempt_at(now, job.attempts);
            job.requeue(next, err.summary(), now);
            if let Err(e) = self.store.update(job).await {
                error!(job_id = %job.id, error = %e, "failed to persist retry");
                return;
            }
            warn!(
                job_id = %job.id,
                attempt = job.attempts,
                max_attempts = job.max_attempts,
                next_attempt_at = %next,
                "job requeued for retry"
            );
            self.metrics.record_retried(job.job_type);
        } else {
            self.dead_letter(job, err, "handler_failure").await;
        }
    }

    /// Terminal failure: structured context lands in `output_data` so
    /// operators can triage without re-parsing free-text logs.
    async fn dead_letter(&self, job: &mut JobRecord, err: &HandlerError, class: &str) {
        let now = Utc::now();
        let context = json!({
            "error_code": err.code(),
            "error_class": class,
            "file_id": job.file_id,
            "job_type": job.job_type,
            "attempts": job.attempts,
            "message": err.message(),
            "timestamp": now,
        });
        job.dead_letter(context, err.summary(), now);
        if let Err(e) = self.store.update(job).await {
            error!(job_id = %job.id, error = %e, "failed to persist dead-letter");
            return;
        }
        error!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempts = job.attempts,
            error_code = %err.code(),
            "job moved to dead letter queue"
        );
        self.metrics.record_dead_lettered(job.job_type);
    }
}
