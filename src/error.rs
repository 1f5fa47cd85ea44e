use thiserror::Error;

use crate::types::{FileId, JobId, JobType};

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Infrastructure errors for queue operations.
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("job already exists for file {file_id} with type {job_type}")]
    DuplicateJob { file_id: FileId, job_type: JobType },

    #[error("creation race for file {file_id} ({job_type}) could not be resolved")]
    CreationRaceUnresolved { file_id: FileId, job_type: JobType },

    #[error("storage error: {0}")]
    Storage(String),
}

/// Failure raised by a job handler.
///
/// `code` is triage metadata only (`UPPER_SNAKE` identifiers such as
/// `S3_NOT_FOUND`); it never influences retry behavior.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct HandlerError {
    code: Option<String>,
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Error code for structured triage: the explicit code, else an
    /// `UPPER_SNAKE:` prefix parsed from the message, else `HANDLER_ERROR`.
    pub fn code(&self) -> &str {
        if let Some(ref code) = self.code {
            return code;
        }
        if let Some((prefix, _)) = self.message.split_once(':') {
            let prefix = prefix.trim();
            if !prefix.is_empty()
                && prefix
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c == '_' || c.is_ascii_digit())
            {
                return prefix;
            }
        }
        "HANDLER_ERROR"
    }

    /// Short `CODE: message` summary for the job row.
    pub fn summary(&self) -> String {
        if self.code.is_none() && self.message.starts_with(self.code()) {
            return self.message.clone();
        }
        format!("{}: {}", self.code(), self.message)
    }
}
