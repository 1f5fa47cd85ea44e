use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{FileId, JobId, OwnerId, WorkerId};

/// Default priority for new jobs; lower values are claimed first.
pub const DEFAULT_PRIORITY: i32 = 5;

/// Default retry budget before a job is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Kinds of post-upload processing a file can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    /// Extract text from PDFs and images.
    Ocr,
    /// Generate embeddings for semantic search.
    Embed,
    /// Scan for personally identifiable information.
    PiiScan,
    /// Redact sensitive content from documents.
    Redact,
    /// Generate document summaries.
    Summarize,
}

impl JobType {
    /// All known job types.
    pub fn all() -> &'static [JobType] {
        &[
            Self::Ocr,
            Self::Embed,
            Self::PiiScan,
            Self::Redact,
            Self::Summarize,
        ]
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ocr => "OCR",
            Self::Embed => "EMBED",
            Self::PiiScan => "PII_SCAN",
            Self::Redact => "REDACT",
            Self::Summarize => "SUMMARIZE",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OCR" => Ok(Self::Ocr),
            "EMBED" => Ok(Self::Embed),
            "PII_SCAN" => Ok(Self::PiiScan),
            "REDACT" => Ok(Self::Redact),
            "SUMMARIZE" => Ok(Self::Summarize),
            _ => Err(format!("unknown job type: {}", s)),
        }
    }
}

/// Lifecycle states of a job row.
///
/// Transitions: `Pending → Running → {Done | Pending (retry) | Dlq}`, plus
/// `Running → Pending` via reclamation. `Done` and `Dlq` are terminal; rows
/// are never physically deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Created, waiting to be claimed by a worker.
    Pending,
    /// Claimed and currently executing.
    Running,
    /// Completed successfully.
    Done,
    /// Display-only transient failure state; the retry path returns jobs to
    /// `Pending` directly.
    Failed,
    /// Dead letter queue: retry budget exhausted, awaiting operator triage.
    Dlq,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Dlq)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Dlq => "DLQ",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One unit of asynchronous work against a stored file.
///
/// `locked_by`/`locked_at` are `Some` exactly while `status == Running`.
/// `attempts` is incremented by [`JobRecord::begin_run`] (the claim side
/// effect) and nowhere else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub owner_id: OwnerId,
    pub file_id: FileId,
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: i32,
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub locked_by: Option<WorkerId>,
    pub locked_at: Option<DateTime<Utc>>,
    pub depends_on: Option<JobId>,
    pub input_params: Option<Value>,
    pub output_data: Option<Value>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Materialize a `Pending` row from an insert request.
    pub fn new(job: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            owner_id: job.owner_id,
            file_id: job.file_id,
            job_type: job.job_type,
            status: JobStatus::Pending,
            priority: job.priority,
            attempts: 0,
            max_attempts: job.max_attempts,
            next_attempt_at: None,
            locked_by: None,
            locked_at: None,
            depends_on: job.depends_on,
            input_params: job.input_params,
            output_data: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Whether the job is due: no deferral, or the deferral has elapsed.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        match self.next_attempt_at {
            None => true,
            Some(at) => at <= now,
        }
    }

    pub fn has_remaining_attempts(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Claim side effects: `Running`, lock fields set, attempts incremented.
    pub fn begin_run(&mut self, worker: &WorkerId, now: DateTime<Utc>) {
        self.status = JobStatus::Running;
        self.locked_by = Some(worker.clone());
        self.locked_at = Some(now);
        self.attempts += 1;
        self.updated_at = now;
    }

    /// Successful completion: scheduling and lock fields cleared.
    pub fn complete(&mut self, output: Option<Value>, now: DateTime<Utc>) {
        self.status = JobStatus::Done;
        self.completed_at = Some(now);
        self.locked_by = None;
        self.locked_at = None;
        self.next_attempt_at = None;
        self.error_message = None;
        if let Some(output) = output {
            self.output_data = Some(output);
        }
        self.updated_at = now;
    }

    /// Failed attempt with budget remaining: back to `Pending`, deferred.
    pub fn requeue(&mut self, next_attempt_at: DateTime<Utc>, error: String, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.locked_by = None;
        self.locked_at = None;
        self.next_attempt_at = Some(next_attempt_at);
        self.error_message = Some(error);
        self.updated_at = now;
    }

    /// Terminal failure: structured triage context replaces `output_data`,
    /// a short summary stays in `error_message`.
    pub fn dead_letter(&mut self, context: Value, summary: String, now: DateTime<Utc>) {
        self.status = JobStatus::Dlq;
        self.locked_by = None;
        self.locked_at = None;
        self.output_data = Some(context);
        self.error_message = Some(summary);
        self.updated_at = now;
    }

    /// Reclaim a job abandoned by a dead worker: back to `Pending` with a
    /// deferral. `attempts` is deliberately untouched; the next claim
    /// increments it.
    pub fn release(&mut self, next_attempt_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.locked_by = None;
        self.locked_at = None;
        self.next_attempt_at = Some(next_attempt_at);
        self.updated_at = now;
    }
}

/// Request to insert a job row.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub owner_id: OwnerId,
    pub file_id: FileId,
    pub job_type: JobType,
    pub priority: i32,
    pub depends_on: Option<JobId>,
    pub input_params: Option<Value>,
    pub max_attempts: u32,
}

impl NewJob {
    pub fn new(owner_id: OwnerId, file_id: FileId, job_type: JobType) -> Self {
        Self {
            owner_id,
            file_id,
            job_type,
            priority: DEFAULT_PRIORITY,
            depends_on: None,
            input_params: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Gate this job on another job reaching `Done`.
    pub fn depends_on(mut self, job_id: JobId) -> Self {
        self.depends_on = Some(job_id);
        self
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input_params = Some(input);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}
