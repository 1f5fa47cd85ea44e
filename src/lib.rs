//! Durable job queue for asynchronous post-upload file processing.
//!
//! After a file lands in storage it fans out into background work: OCR text
//! extraction, embeddings, PII scanning, redaction, summarization. This crate
//! owns that pipeline's queue:
//!
//! - a [`JobStore`] port over the durable job table, with an atomic
//!   skip-locked claim protocol for concurrent worker processes, and
//!   [`MemoryStore`] as the in-process reference implementation
//! - a polling [`Scheduler`](worker::Scheduler) feeding a bounded execution
//!   pool with caller-runs backpressure
//! - capped exponential backoff with jitter ([`RetryPolicy`]) and
//!   dead-lettering with structured triage context
//! - a [`Reclaimer`](worker::Reclaimer) that resets jobs whose worker died
//!   mid-run
//! - an idempotent, race-safe [`JobCreator`] for the upload trigger
//! - a periodic [`Reconciler`] that backfills job rows the trigger missed
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//! use vault_queue::{
//!     HandlerError, HandlerRegistry, JobCreator, JobHandler, JobRecord, JobType, MemoryStore,
//!     NewJob, OwnerId, FileId, QueueWorker, WorkerConfig, WorkerId,
//! };
//!
//! struct OcrHandler;
//!
//! #[async_trait]
//! impl JobHandler for OcrHandler {
//!     fn supports(&self, job: &JobRecord) -> bool {
//!         job.job_type == JobType::Ocr
//!     }
//!
//!     async fn execute(&self, job: &JobRecord) -> Result<Option<Value>, HandlerError> {
//!         // Fetch the file, extract text...
//!         let _ = job.file_id;
//!         Ok(Some(json!({ "pages": 3 })))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(MemoryStore::new());
//!
//!     let mut handlers = HandlerRegistry::new();
//!     handlers.register(Arc::new(OcrHandler));
//!
//!     let worker = QueueWorker::new(store.clone(), Arc::new(handlers), WorkerConfig::default());
//!     let handle = worker.start(WorkerId::generate());
//!
//!     let creator = JobCreator::new(store);
//!     creator
//!         .create_job(NewJob::new(OwnerId::new(), FileId::new(), JobType::Ocr))
//!         .await
//!         .expect("job creation");
//!
//!     // ... serve traffic ...
//!     handle.shutdown().await;
//! }
//! ```

pub mod backoff;
pub mod config;
pub mod creation;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod reconcile;
pub mod store;
pub mod types;
pub mod worker;

pub use backoff::RetryPolicy;
pub use config::{ReconcilerConfig, WorkerConfig};
pub use creation::JobCreator;
pub use error::{HandlerError, QueueError, QueueResult};
pub use handler::{HandlerRegistry, JobHandler};
pub use metrics::{MetricsSnapshot, Outcome, QueueMetrics, TypeCounters};
pub use reconcile::{CatalogFile, ContentTypeRule, FileCatalog, ReconcileRule, Reconciler};
pub use store::memory::MemoryStore;
pub use store::JobStore;
pub use types::{
    FileId, JobId, JobRecord, JobStatus, JobType, NewJob, OwnerId, WorkerId,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_PRIORITY,
};
pub use worker::{JobExecutor, LoopHandle, QueueWorker, Reclaimer, Scheduler, WorkerHandle};
