pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::QueueResult;
use crate::types::{FileId, JobId, JobRecord, JobStatus, JobType, NewJob, OwnerId, WorkerId};

/// Contract every durable job store must satisfy.
///
/// Each method is one atomic unit of work against the store; callers never
/// compose a larger transaction across calls. [`JobStore::claim`] is the only
/// cross-worker synchronization primitive in the system: implementations must
/// lock candidate rows, *skip* rows locked by a concurrent in-flight claim
/// rather than waiting on them, and apply claim side effects to exactly the
/// rows they locked (`FOR UPDATE SKIP LOCKED`, or an equivalent conditional
/// batched update with optimistic retry).
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new `Pending` row. Fails with
    /// [`QueueError::DuplicateJob`](crate::QueueError::DuplicateJob) when a
    /// row for the same `(file_id, job_type)` pair already exists.
    async fn insert(&self, job: NewJob) -> QueueResult<JobId>;

    /// Bulk insert that silently skips rows colliding with the
    /// `(file_id, job_type)` uniqueness invariant. Returns rows written.
    async fn insert_missing(&self, jobs: Vec<NewJob>) -> QueueResult<usize>;

    async fn get(&self, id: JobId) -> QueueResult<Option<JobRecord>>;

    async fn find_by_file_and_type(
        &self,
        file_id: FileId,
        job_type: JobType,
    ) -> QueueResult<Option<JobRecord>>;

    /// Atomically claim up to `batch_size` eligible jobs for `worker` and
    /// return their IDs.
    ///
    /// Eligible: `Pending`, `next_attempt_at` absent or due, and the
    /// dependency (if any) `Done`. Ordering: `next_attempt_at` ascending with
    /// absent first, then `priority` ascending, `created_at` ascending,
    /// `id` ascending. Claimed rows become `Running` with `locked_by` and
    /// `locked_at` set and `attempts` incremented exactly once.
    async fn claim(&self, worker: &WorkerId, batch_size: usize) -> QueueResult<Vec<JobId>>;

    /// Persist the full state of a record previously read from this store.
    async fn update(&self, record: &JobRecord) -> QueueResult<()>;

    /// `Running` jobs whose lock predates `cutoff` (worker died or hung).
    async fn find_stale_running(&self, cutoff: DateTime<Utc>) -> QueueResult<Vec<JobRecord>>;

    /// Queue-depth gauge support for the monitoring sink.
    async fn count_by_status(&self, status: JobStatus) -> QueueResult<u64>;

    /// All jobs for an owner, newest first (admin/debugging surface).
    async fn find_by_owner(&self, owner_id: OwnerId) -> QueueResult<Vec<JobRecord>>;

    /// An owner's jobs in one status, newest first (DLQ inspection).
    async fn find_by_owner_and_status(
        &self,
        owner_id: OwnerId,
        status: JobStatus,
    ) -> QueueResult<Vec<JobRecord>>;
}
