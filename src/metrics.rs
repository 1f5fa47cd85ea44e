use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::types::JobType;

/// Outcome tag for finished executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Counter set shared by the scheduler, executor, reclaimer and reconciler,
/// exposed to the monitoring sink via [`QueueMetrics::snapshot`].
///
/// Tags are limited to job type and outcome. `JobType` is a closed enum, so
/// cardinality stays bounded; per-job-ID tags are deliberately impossible.
#[derive(Default)]
pub struct QueueMetrics {
    claimed: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    reclaimed: AtomicU64,
    reconciled: AtomicU64,
    per_type: RwLock<HashMap<JobType, TypeCounters>>,
}

/// Counters for one job type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeCounters {
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub reclaimed: u64,
    pub reconciled: u64,
}

impl QueueMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_claimed(&self, count: usize) {
        self.claimed.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_completed(&self, job_type: JobType, outcome: Outcome) {
        let mut per_type = self.per_type.write();
        let counters = per_type.entry(job_type).or_default();
        match outcome {
            Outcome::Success => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                counters.completed += 1;
            }
            Outcome::Failure => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                counters.failed += 1;
            }
        }
    }

    pub fn record_retried(&self, job_type: JobType) {
        self.retried.fetch_add(1, Ordering::Relaxed);
        self.per_type.write().entry(job_type).or_default().retried += 1;
    }

    pub fn record_dead_lettered(&self, job_type: JobType) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
        self.per_type
            .write()
            .entry(job_type)
            .or_default()
            .dead_lettered += 1;
    }

    pub fn record_reclaimed(&self, job_type: JobType) {
        self.reclaimed.fetch_add(1, Ordering::Relaxed);
        self.per_type.write().entry(job_type).or_default().reclaimed += 1;
    }

    pub fn record_reconciled(&self, job_type: JobType, count: usize) {
        self.reconciled.fetch_add(count as u64, Ordering::Relaxed);
        self.per_type
            .write()
            .entry(job_type)
            .or_default()
            .reconciled += count as u64;
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            claimed: self.claimed.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
            reconciled: self.reconciled.load(Ordering::Relaxed),
            per_type: self.per_type.read().clone(),
        }
    }
}

/// Snapshot of queue counters at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub claimed: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub reclaimed: u64,
    pub reconciled: u64,
    pub per_type: HashMap<JobType, TypeCounters>,
}
