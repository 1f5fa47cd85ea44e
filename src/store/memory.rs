use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::{QueueError, QueueResult};
use crate::store::JobStore;
use crate::types::{FileId, JobId, JobRecord, JobStatus, JobType, NewJob, OwnerId, WorkerId};

/// In-process reference store for tests, local development, and embedded use.
///
/// One mutex acquisition is one transaction. A claim mutates its whole batch
/// before any other claimer can observe the table, so rows taken by a
/// concurrent claim are seen as `Running` and skipped, never waited on:
/// the same discipline a durable store provides with `FOR UPDATE SKIP
/// LOCKED`.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Tables>,
}

#[derive(Default)]
struct Tables {
    jobs: HashMap<JobId, JobRecord>,
    // Unique index enforcing at most one job per (file_id, job_type).
    by_file_type: HashMap<(FileId, JobType), JobId>,
}

impl Tables {
    fn insert(&mut self, job: NewJob, now: DateTime<Utc>) -> QueueResult<JobId> {
        let key = (job.file_id, job.job_type);
        if self.by_file_type.contains_key(&key) {
            return Err(QueueError::DuplicateJob {
                file_id: job.file_id,
                job_type: job.job_type,
            });
        }
        let record = JobRecord::new(job, now);
        let id = record.id;
        self.by_file_type.insert(key, id);
        self.jobs.insert(id, record);
        Ok(id)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows in the table (test support).
    pub fn job_count(&self) -> usize {
        self.inner.lock().jobs.len()
    }

    /// Backdate a running job's lock by `age` (test support).
    pub fn force_lock_age(&self, id: JobId, age: Duration) {
        let mut tables = self.inner.lock();
        if let Some(record) = tables.jobs.get_mut(&id) {
            if let Some(locked_at) = record.locked_at {
                let age = chrono::Duration::from_std(age).unwrap_or_default();
                record.locked_at = Some(locked_at - age);
            }
        }
    }

    /// Make a deferred job due immediately (test support).
    pub fn force_due(&self, id: JobId) {
        let mut tables = self.inner.lock();
        if let Some(record) = tables.jobs.get_mut(&id) {
            if record.next_attempt_at.is_some() {
                record.next_attempt_at = Some(Utc::now() - chrono::Duration::seconds(1));
            }
        }
    }
}

fn claim_key(job: &JobRecord) -> (Option<DateTime<Utc>>, i32, DateTime<Utc>, JobId) {
    // Option's ordering puts None before Some, which is exactly the
    // nulls-first rule for next_attempt_at.
    (job.next_attempt_at, job.priority, job.created_at, job.id)
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert(&self, job: NewJob) -> QueueResult<JobId> {
        let now = Utc::now();
        self.inner.lock().insert(job, now)
    }

    async fn insert_missing(&self, jobs: Vec<NewJob>) -> QueueResult<usize> {
        let now = Utc::now();
        let mut tables = self.inner.lock();
        let mut written = 0;
        for job in jobs {
            match tables.insert(job, now) {
                Ok(_) => written += 1,
                Err(QueueError::DuplicateJob { .. }) => {}
                Err(other) => return Err(other),
            }
        }
        Ok(written)
    }

    async fn get(&self, id: JobId) -> QueueResult<Option<JobRecord>> {
        Ok(self.inner.lock().jobs.get(&id).cloned())
    }

    async fn find_by_file_and_type(
        &self,
        file_id: FileId,
        job_type: JobType,
    ) -> QueueResult<Option<JobRecord>> {
        let tables = self.inner.lock();
        let id = tables.by_file_type.get(&(file_id, job_type));
        Ok(id.and_then(|id| tables.jobs.get(id)).cloned())
    }

    async fn claim(&self, worker: &WorkerId, batch_size: usize) -> QueueResult<Vec<JobId>> {
        let now = Utc::now();
        let mut guard = self.inner.lock();
        let tables = &mut *guard;

        let jobs = &tables.jobs;
        let mut candidates: Vec<JobId> = jobs
            .values()
            .filter(|job| job.status == JobStatus::Pending && job.is_ready(now))
            .filter(|job| match job.depends_on {
                None => true,
                Some(dep) => jobs
                    .get(&dep)
                    .map_or(false, |parent| parent.status == JobStatus::Done),
            })
            .map(|job| job.id)
            .collect();

        candidates.sort_by_key(|id| claim_key(&jobs[id]));
        candidates.truncate(batch_size);

        for id in &candidates {
            if let Some(record) = tables.jobs.get_mut(id) {
                record.begin_run(worker, now);
            }
        }
        Ok(candidates)
    }

    async fn update(&self, record: &JobRecord) -> QueueResult<()> {
        let mut tables = self.inner.lock();
        match tables.jobs.get_mut(&record.id) {
            Some(slot) => {
                *slot = record.clone();
                Ok(())
            }
            None => Err(QueueError::JobNotFound(record.id)),
        }
    }

    async fn find_stale_running(&self, cutoff: DateTime<Utc>) -> QueueResult<Vec<JobRecord>> {
        let tables = self.inner.lock();
        Ok(tables
            .jobs
            .values()
            .filter(|job| {
                job.status == JobStatus::Running
                    && job.locked_at.map_or(false, |locked_at| locked_at < cutoff)
            })
            .cloned()
            .collect())
    }

    async fn count_by_status(&self, status: JobStatus) -> QueueResult<u64> {
        let tables = self.inner.lock();
        Ok(tables.jobs.values().filter(|j| j.status == status).count() as u64)
    }

    async fn find_by_owner(&self, owner_id: OwnerId) -> QueueResult<Vec<JobRecord>> {
        let tables = self.inner.lock();
        let mut jobs: Vec<JobRecord> = tables
            .jobs
            .values()
            .filter(|j| j.owner_id == owner_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn find_by_owner_and_status(
        &self,
        owner_id: OwnerId,
        status: JobStatus,
    ) -> QueueResult<Vec<JobRecord>> {
        let tables = self.inner.lock();
        let mut jobs: Vec<JobRecord> = tables
            .jobs
            .values()
            .filter(|j| j.owner_id == owner_id && j.status == status)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }
}
