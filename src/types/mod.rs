pub mod ids;
pub mod job;

pub use ids::{FileId, JobId, OwnerId, WorkerId};
pub use job::{JobRecord, JobStatus, JobType, NewJob, DEFAULT_MAX_ATTEMPTS, DEFAULT_PRIORITY};
