use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde_json::Value;

use vault_queue::{
    CatalogFile, ContentTypeRule, FileCatalog, FileId, HandlerError, HandlerRegistry, JobCreator,
    JobHandler, JobId, JobRecord, JobStatus, JobStore, JobType, MemoryStore, NewJob, OwnerId,
    QueueError, QueueMetrics, QueueResult, Reclaimer, ReconcileRule, Reconciler, ReconcilerConfig,
    RetryPolicy, Scheduler, WorkerConfig, WorkerId,
};

/// Test factory functions
fn new_job() -> NewJob {
    NewJob::new(OwnerId::new(), FileId::new(), JobType::Ocr)
}

fn worker(name: &str) -> WorkerId {
    WorkerId::from(name)
}

fn executor_with(
    store: Arc<MemoryStore>,
    registry: HandlerRegistry,
    max_attempts: u32,
) -> (Arc<vault_queue::JobExecutor>, Arc<QueueMetrics>) {
    let metrics = Arc::new(QueueMetrics::new());
    let executor = Arc::new(vault_queue::JobExecutor::new(
        store,
        Arc::new(registry),
        Arc::new(RetryPolicy::with_seed(42)),
        metrics.clone(),
        max_attempts,
    ));
    (executor, metrics)
}

struct SucceedingHandler {
    kind: JobType,
}

#[async_trait]
impl JobHandler for SucceedingHandler {
    fn supports(&self, job: &JobRecord) -> bool {
        job.job_type == self.kind
    }

    async fn execute(&self, _job: &JobRecord) -> Result<Option<Value>, HandlerError> {
        Ok(Some(serde_json::json!({ "text_length": 120, "pages": 2 })))
    }
}

struct FailingHandler {
    kind: JobType,
}

#[async_trait]
impl JobHandler for FailingHandler {
    fn supports(&self, job: &JobRecord) -> bool {
        job.job_type == self.kind
    }

    async fn execute(&self, _job: &JobRecord) -> Result<Option<Value>, HandlerError> {
        Err(HandlerError::new("S3_NOT_FOUND: source object is gone"))
    }
}

async fn fetch(store: &MemoryStore, id: JobId) -> JobRecord {
    store.get(id).await.unwrap().expect("job should exist")
}

/// No double-claim + end-to-end: 5 pending jobs, 2 concurrent workers with
/// batch size 10. Every job claimed exactly once, all running with one
/// attempt consumed.
#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn concurrent_workers_never_claim_the_same_job() {
    let store = Arc::new(MemoryStore::new());
    let mut expected = HashSet::new();
    for _ in 0..5 {
        expected.insert(store.insert(new_job()).await.unwrap());
    }

    let claims = join_all((0..2).map(|i| {
        let store = store.clone();
        tokio::spawn(async move { store.claim(&worker(&format!("w{}", i)), 10).await.unwrap() })
    }))
    .await;

    let mut seen = Vec::new();
    for claim in claims {
        seen.extend(claim.unwrap());
    }

    let unique: HashSet<JobId> = seen.iter().copied().collect();
    assert_eq!(seen.len(), 5, "total claimed must cover all eligible jobs");
    assert_eq!(unique, expected, "no overlap, full coverage");

    for id in expected {
        let job = fetch(&store, id).await;
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.attempts, 1);
        assert!(job.locked_by.is_some());
        assert!(job.locked_at.is_some());
    }
}

/// Claim ordering: priorities {10, 1, 5} come back as {1, 5, 10}.
#[tokio::test]
async fn claim_orders_by_priority_then_age() {
    let store = Arc::new(MemoryStore::new());
    store.insert(new_job().with_priority(10)).await.unwrap();
    store.insert(new_job().with_priority(1)).await.unwrap();
    store.insert(new_job().with_priority(5)).await.unwrap();

    let claimed = store.claim(&worker("w1"), 3).await.unwrap();
    assert_eq!(claimed.len(), 3);

    let mut priorities = Vec::new();
    for id in claimed {
        priorities.push(fetch(&store, id).await.priority);
    }
    assert_eq!(priorities, vec![1, 5, 10]);
}

/// Jobs deferred into the future are not claimable.
#[tokio::test]
async fn deferred_jobs_are_not_claimed() {
    let store = Arc::new(MemoryStore::new());
    let id = store.insert(new_job()).await.unwrap();

    let mut record = fetch(&store, id).await;
    record.next_attempt_at = Some(Utc::now() + chrono::Duration::minutes(5));
    store.update(&record).await.unwrap();

    let claimed = store.claim(&worker("w1"), 10).await.unwrap();
    assert!(claimed.is_empty());
}

/// Dependency gating: the child stays unclaimable until the parent is DONE.
#[tokio::test]
async fn dependent_job_waits_for_parent_completion() {
    let store = Arc::new(MemoryStore::new());
    let parent = store.insert(new_job()).await.unwrap();
    let child_job = NewJob::new(OwnerId::new(), FileId::new(), JobType::Embed).depends_on(parent);
    let child = store.insert(child_job).await.unwrap();

    // Parent pending: only the parent is eligible.
    let first = store.claim(&worker("w1"), 10).await.unwrap();
    assert_eq!(first, vec![parent]);

    // Parent running: the child is still gated.
    let second = store.claim(&worker("w1"), 10).await.unwrap();
    assert!(second.is_empty());

    let mut record = fetch(&store, parent).await;
    record.complete(None, Utc::now());
    store.update(&record).await.unwrap();

    let third = store.claim(&worker("w1"), 10).await.unwrap();
    assert_eq!(third, vec![child]);
}

/// Attempt monotonicity: +1 per claim, +0 per reclamation.
#[tokio::test]
async fn attempts_increment_only_on_claim() {
    let store = Arc::new(MemoryStore::new());
    let config = WorkerConfig::default();
    let id = store.insert(new_job()).await.unwrap();

    store.claim(&worker("w1"), 1).await.unwrap();
    assert_eq!(fetch(&store, id).await.attempts, 1);

    // Simulate a dead worker and reclaim.
    store.force_lock_age(id, Duration::from_secs(20 * 60));
    let reclaimer = Reclaimer::new(
        store.clone(),
        Arc::new(RetryPolicy::with_seed(1)),
        Arc::new(QueueMetrics::new()),
        &config,
    );
    let reclaimed = reclaimer.sweep_once().await.unwrap();
    assert_eq!(reclaimed, 1);
    assert_eq!(fetch(&store, id).await.attempts, 1, "reclaim must not consume an attempt");

    // The next claim consumes the second attempt.
    store.force_due(id);
    let again = store.claim(&worker("w2"), 1).await.unwrap();
    assert_eq!(again, vec![id]);
    assert_eq!(fetch(&store, id).await.attempts, 2);
}

/// Reclamation correctness: stale RUNNING rows go back to PENDING with the
/// lock cleared and a backoff-shaped deferral.
#[test_log::test(tokio::test)]
async fn reclaimer_resets_stale_jobs() {
    let store = Arc::new(MemoryStore::new());
    let config = WorkerConfig::default();
    let metrics = Arc::new(QueueMetrics::new());
    let id = store.insert(new_job()).await.unwrap();
    let fresh = store.insert(new_job()).await.unwrap();

    store.claim(&worker("w1"), 2).await.unwrap();
    // Only the first job's lock goes stale.
    store.force_lock_age(id, Duration::from_secs(20 * 60));

    let reclaimer = Reclaimer::new(
        store.clone(),
        Arc::new(RetryPolicy::with_seed(7)),
        metrics.clone(),
        &config,
    );
    let before = Utc::now();
    let reclaimed = reclaimer.sweep_once().await.unwrap();
    assert_eq!(reclaimed, 1);

    let job = fetch(&store, id).await;
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.locked_by.is_none());
    assert!(job.locked_at.is_none());
    assert_eq!(job.attempts, 1);

    // attempts = 1 → 2 minutes scaled by [0.75, 1.25].
    let next: DateTime<Utc> = job.next_attempt_at.expect("deferral set");
    let delta = next - before;
    assert!(delta >= chrono::Duration::seconds(85), "deferral too short: {}", delta);
    assert!(delta <= chrono::Duration::seconds(155), "deferral too long: {}", delta);

    let untouched = fetch(&store, fresh).await;
    assert_eq!(untouched.status, JobStatus::Running);

    assert_eq!(metrics.snapshot().reclaimed, 1);

    // Reclaimed job is claimable again once due.
    store.force_due(id);
    let again = store.claim(&worker("w2"), 10).await.unwrap();
    assert_eq!(again, vec![id]);
}

/// Idempotent creation: concurrent creators for one (file, type) pair agree
/// on the job ID and leave exactly one row behind.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creation_yields_one_job() {
    let store = Arc::new(MemoryStore::new());
    let creator = Arc::new(JobCreator::new(store.clone()));
    let job = new_job();

    let results = join_all((0..4).map(|_| {
        let creator = creator.clone();
        let job = job.clone();
        tokio::spawn(async move { creator.create_job(job).await.unwrap() })
    }))
    .await;

    let ids: HashSet<JobId> = results.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(ids.len(), 1, "all creators must observe the same job ID");
    assert_eq!(store.job_count(), 1);
}

/// Executor success path: DONE, scheduling fields cleared, output persisted.
#[tokio::test]
async fn successful_execution_completes_the_job() {
    let store = Arc::new(MemoryStore::new());
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(SucceedingHandler { kind: JobType::Ocr }));
    let (executor, metrics) = executor_with(store.clone(), registry, 3);

    let id = store.insert(new_job()).await.unwrap();
    store.claim(&worker("w1"), 1).await.unwrap();
    executor.execute(id).await;

    let job = fetch(&store, id).await;
    assert_eq!(job.status, JobStatus::Done);
    assert!(job.completed_at.is_some());
    assert!(job.locked_by.is_none());
    assert!(job.locked_at.is_none());
    assert!(job.next_attempt_at.is_none());
    assert!(job.error_message.is_none());
    assert_eq!(job.output_data.unwrap()["pages"], 2);

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.completed, 1);
    assert_eq!(snapshot.failed, 0);
}

/// DLQ trigger: with a budget of 2, the first failure requeues and the
/// second dead-letters with structured context.
#[tokio::test]
async fn repeated_failures_reach_the_dead_letter_queue() {
    let store = Arc::new(MemoryStore::new());
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(FailingHandler { kind: JobType::Ocr }));
    let (executor, metrics) = executor_with(store.clone(), registry, 2);

    let id = store.insert(new_job()).await.unwrap();

    // Attempt 1: fails, requeued with a deferral.
    store.claim(&worker("w1"), 1).await.unwrap();
    executor.execute(id).await;
    let job = fetch(&store, id).await;
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 1);
    assert!(job.next_attempt_at.is_some());
    assert_eq!(
        job.error_message.as_deref(),
        Some("S3_NOT_FOUND: source object is gone")
    );

    // Attempt 2: budget exhausted, dead-lettered.
    store.force_due(id);
    store.claim(&worker("w1"), 1).await.unwrap();
    executor.execute(id).await;

    let job = fetch(&store, id).await;
    assert_eq!(job.status, JobStatus::Dlq);
    assert!(job.locked_by.is_none());
    assert!(job.locked_at.is_none());

    let context = job.output_data.expect("structured DLQ context");
    assert_eq!(context["error_code"], "S3_NOT_FOUND");
    assert_eq!(context["error_class"], "handler_failure");
    assert_eq!(context["job_type"], "OCR");
    assert_eq!(context["attempts"], 2);
    assert!(context["message"].as_str().unwrap().contains("source object"));
    assert!(context["timestamp"].is_string());

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.retried, 1);
    assert_eq!(snapshot.dead_lettered, 1);
    assert_eq!(snapshot.failed, 2);
}

/// A job type with no registered handler is a deployment gap: dead-lettered
/// immediately, no retries consumed on the handler path.
#[tokio::test]
async fn missing_handler_dead_letters_immediately() {
    let store = Arc::new(MemoryStore::new());
    let (executor, metrics) = executor_with(store.clone(), HandlerRegistry::new(), 3);

    let id = store.insert(new_job()).await.unwrap();
    store.claim(&worker("w1"), 1).await.unwrap();
    executor.execute(id).await;

    let job = fetch(&store, id).await;
    assert_eq!(job.status, JobStatus::Dlq);

    let context = job.output_data.expect("structured DLQ context");
    assert_eq!(context["error_code"], "NO_HANDLER");
    assert_eq!(context["error_class"], "configuration");

    assert_eq!(metrics.snapshot().dead_lettered, 1);
    assert_eq!(metrics.snapshot().retried, 0);
}

/// Scheduler poll: claims and executes without blocking the loop.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn poll_once_claims_and_executes() {
    let store = Arc::new(MemoryStore::new());
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(SucceedingHandler { kind: JobType::Ocr }));
    let (executor, metrics) = executor_with(store.clone(), registry, 3);

    let config = WorkerConfig::default();
    let scheduler = Scheduler::new(
        store.clone(),
        executor,
        metrics.clone(),
        &config,
        worker("w1"),
    );

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(store.insert(new_job()).await.unwrap());
    }

    scheduler.poll_once().await;
    assert_eq!(metrics.snapshot().claimed, 3);

    // Execution happens on spawned tasks; wait for the store to settle.
    for id in ids {
        wait_for_status(&store, id, JobStatus::Done).await;
    }
    assert_eq!(metrics.snapshot().completed, 3);
}

async fn wait_for_status(store: &MemoryStore, id: JobId, status: JobStatus) {
    for _ in 0..200 {
        if fetch(store, id).await.status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} never reached {:?}", id, status);
}

struct StaticCatalog {
    files: Vec<CatalogFile>,
}

#[async_trait]
impl FileCatalog for StaticCatalog {
    async fn eligible_files(
        &self,
        _rule: &ContentTypeRule,
        _since: DateTime<Utc>,
    ) -> QueueResult<Vec<CatalogFile>> {
        Ok(self.files.clone())
    }
}

/// Reconciler backfills only the files missing a job row, and is idempotent.
#[tokio::test]
async fn reconciler_backfills_missing_jobs() {
    let store = Arc::new(MemoryStore::new());
    let metrics = Arc::new(QueueMetrics::new());

    let files: Vec<CatalogFile> = (0..3)
        .map(|_| CatalogFile {
            owner_id: OwnerId::new(),
            file_id: FileId::new(),
        })
        .collect();

    // One file already has its OCR job.
    store
        .insert(NewJob::new(files[0].owner_id, files[0].file_id, JobType::Ocr))
        .await
        .unwrap();

    let reconciler = Reconciler::new(
        store.clone(),
        Arc::new(StaticCatalog { files }),
        vec![ReconcileRule {
            job_type: JobType::Ocr,
            content_types: ContentTypeRule::new(&["application/pdf", "image/*"]),
            priority: 5,
        }],
        metrics.clone(),
        ReconcilerConfig::default(),
    );

    let created = reconciler.run_once().await.unwrap();
    assert_eq!(created, 2);
    assert_eq!(store.job_count(), 3);
    assert_eq!(metrics.snapshot().reconciled, 2);

    // Second pass finds nothing to do.
    let created = reconciler.run_once().await.unwrap();
    assert_eq!(created, 0);
    assert_eq!(store.job_count(), 3);
}

/// Store stub that always loses the insert race and never exposes a winner,
/// driving the creator's bounded winner-read loop to exhaustion.
struct VanishingWinnerStore;

#[async_trait]
impl JobStore for VanishingWinnerStore {
    async fn insert(&self, job: NewJob) -> QueueResult<JobId> {
        Err(QueueError::DuplicateJob {
            file_id: job.file_id,
            job_type: job.job_type,
        })
    }

    async fn insert_missing(&self, _jobs: Vec<NewJob>) -> QueueResult<usize> {
        Ok(0)
    }

    async fn get(&self, _id: JobId) -> QueueResult<Option<JobRecord>> {
        Ok(None)
    }

    async fn find_by_file_and_type(
        &self,
        _file_id: FileId,
        _job_type: JobType,
    ) -> QueueResult<Option<JobRecord>> {
        Ok(None)
    }

    async fn claim(&self, _worker: &WorkerId, _batch_size: usize) -> QueueResult<Vec<JobId>> {
        Ok(Vec::new())
    }

    async fn update(&self, record: &JobRecord) -> QueueResult<()> {
        Err(QueueError::JobNotFound(record.id))
    }

    async fn find_stale_running(&self, _cutoff: DateTime<Utc>) -> QueueResult<Vec<JobRecord>> {
        Ok(Vec::new())
    }

    async fn count_by_status(&self, _status: JobStatus) -> QueueResult<u64> {
        Ok(0)
    }

    async fn find_by_owner(&self, _owner_id: OwnerId) -> QueueResult<Vec<JobRecord>> {
        Ok(Vec::new())
    }

    async fn find_by_owner_and_status(
        &self,
        _owner_id: OwnerId,
        _status: JobStatus,
    ) -> QueueResult<Vec<JobRecord>> {
        Ok(Vec::new())
    }
}

/// When the winner's row never becomes readable, creation surfaces the
/// unresolved race instead of hanging or returning a phantom ID.
#[tokio::test]
async fn unresolved_creation_race_is_reported() {
    let creator = JobCreator::new(Arc::new(VanishingWinnerStore));
    let err = creator.create_job(new_job()).await.unwrap_err();
    assert!(matches!(err, QueueError::CreationRaceUnresolved { .. }));
}

/// Full worker loop: poll, claim, execute, shut down cleanly.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queue_worker_processes_jobs_end_to_end() {
    let store = Arc::new(MemoryStore::new());
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(SucceedingHandler { kind: JobType::Ocr }));

    let config = WorkerConfig {
        poll_interval: Duration::from_millis(50),
        ..WorkerConfig::default()
    };
    let worker = vault_queue::QueueWorker::new(store.clone(), Arc::new(registry), config)
        .with_retry_policy(Arc::new(RetryPolicy::with_seed(3)));
    let metrics = worker.metrics();
    let handle = worker.start(WorkerId::generate());

    let creator = JobCreator::new(store.clone());
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(creator.create_job(new_job()).await.unwrap());
    }

    for id in ids {
        wait_for_status(&store, id, JobStatus::Done).await;
    }
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.claimed, 3);
    assert_eq!(snapshot.completed, 3);

    handle.shutdown().await;
}
