use std::time::Duration;

/// Tunables for one queue worker process.
///
/// All values are externally supplied; defaults live here, not in the logic.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Delay between claim polls.
    pub poll_interval: Duration,
    /// Delay between stuck-job sweeps.
    pub reclaim_interval: Duration,
    /// Age after which a `Running` lock counts as abandoned.
    pub stale_lock_timeout: Duration,
    /// Jobs claimed per poll.
    pub batch_size: usize,
    /// Concurrent job executions.
    pub workers: usize,
    /// Dispatch slots beyond the execution permits. With all slots taken the
    /// polling task runs the job itself instead of queuing further.
    pub queue_depth: usize,
    /// Effective retry budget, applied at execution time over the row value.
    pub max_attempts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            reclaim_interval: Duration::from_secs(60),
            stale_lock_timeout: Duration::from_secs(15 * 60),
            batch_size: 10,
            workers: 4,
            queue_depth: 100,
            max_attempts: 3,
        }
    }
}

/// Tunables for the reconciliation pass.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Delay between passes.
    pub interval: Duration,
    /// How far back to look for files missing a job row.
    pub lookback: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            lookback: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}
