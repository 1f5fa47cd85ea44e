use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::ReconcilerConfig;
use crate::error::QueueResult;
use crate::metrics::QueueMetrics;
use crate::store::JobStore;
use crate::types::{FileId, JobType, NewJob, OwnerId};
use crate::worker::LoopHandle;

/// A file visible to the reconciler.
#[derive(Debug, Clone)]
pub struct CatalogFile {
    pub owner_id: OwnerId,
    pub file_id: FileId,
}

/// Content-type eligibility rule: exact types or `prefix/*` wildcards.
///
/// Matching is prefix-based, so parameterized variants like
/// `application/pdf; charset=binary` still qualify.
#[derive(Debug, Clone)]
pub struct ContentTypeRule {
    patterns: Vec<String>,
}

impl ContentTypeRule {
    pub fn new(patterns: &[&str]) -> Self {
        Self {
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn matches(&self, content_type: &str) -> bool {
        self.patterns.iter().any(|p| match p.strip_suffix('*') {
            Some(prefix) => content_type.starts_with(prefix),
            None => content_type.starts_with(p.as_str()),
        })
    }
}

/// Port to the file metadata table owned by the upload service.
#[async_trait]
pub trait FileCatalog: Send + Sync {
    /// Files uploaded at or after `since` whose content type matches `rule`.
    async fn eligible_files(
        &self,
        rule: &ContentTypeRule,
        since: DateTime<Utc>,
    ) -> QueueResult<Vec<CatalogFile>>;
}

/// Pairs a job type with the files eligible for it.
#[derive(Clone)]
pub struct ReconcileRule {
    pub job_type: JobType,
    pub content_types: ContentTypeRule,
    pub priority: i32,
}

/// Periodic backfill of missing job rows.
///
/// The upload path creates jobs best-effort after its own commit; when that
/// signal is lost, this pass restores the missing rows without coupling
/// upload and job creation synchronously.
pub struct Reconciler {
    store: Arc<dyn JobStore>,
    catalog: Arc<dyn FileCatalog>,
    rules: Vec<ReconcileRule>,
    metrics: Arc<QueueMetrics>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn JobStore>,
        catalog: Arc<dyn FileCatalog>,
        rules: Vec<ReconcileRule>,
        metrics: Arc<QueueMetrics>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            rules,
            metrics,
            config,
        }
    }

    /// Spawn the reconciliation loop. A failed pass is logged and retried on
    /// the next tick.
    pub fn spawn(self) -> LoopHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let join_handle = tokio::spawn(async move {
            info!("reconciler started");
            let mut ticker = interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            error!(error = %e, "reconciliation failed");
                        }
                    }
                }
            }
            info!("reconciler stopped");
        });
        LoopHandle::new(shutdown_tx, join_handle)
    }

    /// One pass over all rules. The store skips conflicting rows, so the
    /// pass is idempotent against the uniqueness invariant.
    pub async fn run_once(&self) -> QueueResult<usize> {
        let lookback = chrono::Duration::from_std(self.config.lookback)
            .unwrap_or_else(|_| chrono::Duration::days(30));
        let since = Utc::now() - lookback;

        let mut total = 0;
        for rule in &self.rules {
            let files = self.catalog.eligible_files(&rule.content_types, since).await?;
            if files.is_empty() {
                debug!(job_type = %rule.job_type, "reconciliation found no eligible files");
                continue;
            }
            let jobs: Vec<NewJob> = files
                .into_iter()
                .map(|file| {
                    NewJob::new(file.owner_id, file.file_id, rule.job_type)
                        .with_priority(rule.priority)
                })
                .collect();
            let created = self.store.insert_missing(jobs).await?;
            if created > 0 {
                info!(job_type = %rule.job_type, created, "reconciliation created missing jobs");
                self.metrics.record_reconciled(rule.job_type, created);
            } else {
                debug!(job_type = %rule.job_type, "reconciliation found no missing jobs");
            }
            total += created;
        }
        Ok(total)
    }
}
