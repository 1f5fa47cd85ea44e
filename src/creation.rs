use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::store::JobStore;
use crate::types::{JobId, NewJob};

/// Bounded winner-read retries after losing a creation race.
const WINNER_READ_ATTEMPTS: u32 = 3;
const WINNER_READ_BACKOFF: Duration = Duration::from_millis(10);

/// Creates job rows for upstream triggers (the file upload path), tolerating
/// concurrent creators for the same `(file_id, job_type)` pair.
///
/// Callers on the upload path treat a creation failure as best-effort (it
/// must never fail the upload) and rely on the reconciler as the backstop.
pub struct JobCreator {
    store: Arc<dyn JobStore>,
}

impl JobCreator {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Insert a `Pending` job, or return the existing row's ID.
    ///
    /// Every concurrent caller for the same pair observes the same job ID;
    /// exactly one of them performs the insert. Each store call below is its
    /// own transaction, so the winner's committed row is visible to the
    /// losers' re-reads.
    pub async fn create_job(&self, job: NewJob) -> QueueResult<JobId> {
        let file_id = job.file_id;
        let job_type = job.job_type;

        // Fast idempotent path.
        if let Some(existing) = self.store.find_by_file_and_type(file_id, job_type).await? {
            debug!(%file_id, %job_type, job_id = %existing.id, "job already exists");
            return Ok(existing.id);
        }

        match self.store.insert(job).await {
            Ok(id) => {
                info!(%file_id, %job_type, job_id = %id, "created job");
                Ok(id)
            }
            Err(QueueError::DuplicateJob { .. }) => {
                // A concurrent creator won between our read and insert; read
                // the winner's row with a short bounded backoff.
                debug!(%file_id, %job_type, "job creation race detected");
                for attempt in 1..=WINNER_READ_ATTEMPTS {
                    if let Some(winner) =
                        self.store.find_by_file_and_type(file_id, job_type).await?
                    {
                        debug!(%file_id, %job_type, job_id = %winner.id, "read winner after race");
                        return Ok(winner.id);
                    }
                    tokio::time::sleep(WINNER_READ_BACKOFF * attempt).await;
                }
                warn!(%file_id, %job_type, "could not read winner after creation race");
                Err(QueueError::CreationRaceUnresolved { file_id, job_type })
            }
            Err(other) => Err(other),
        }
    }
}
