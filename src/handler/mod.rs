pub mod registry;

pub use registry::HandlerRegistry;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::HandlerError;
use crate::types::JobRecord;

/// One job-type-specific processor (OCR, embeddings, PII scanning, ...).
///
/// Handlers receive the full job record and own all type-specific I/O such
/// as fetching the source file. A returned error feeds the retry policy; the
/// returned value, if any, is persisted as the row's `output_data`.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Whether this handler can execute the given job.
    fn supports(&self, job: &JobRecord) -> bool;

    /// Execute the job.
    async fn execute(&self, job: &JobRecord) -> Result<Option<Value>, HandlerError>;
}
