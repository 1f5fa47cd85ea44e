use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Lower bound of the jitter factor.
pub const JITTER_LOW: f64 = 0.75;
/// Upper bound of the jitter factor.
pub const JITTER_HIGH: f64 = 1.25;

/// Exponential backoff for failed and reclaimed jobs.
///
/// The delay for a job that has consumed `attempts` claims is
/// `min(2^attempts, 60) minutes` scaled by a uniform jitter factor in
/// `[0.75, 1.25]`. The jitter spreads retries of jobs that failed together,
/// so a recovering dependency is not hit by a synchronized storm.
pub struct RetryPolicy {
    base: Duration,
    cap: Duration,
    rng: Mutex<StdRng>,
}

impl RetryPolicy {
    /// Policy with the standard 1-minute base and 60-minute cap, seeded from
    /// the OS.
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Deterministic policy for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            base: Duration::from_secs(60),
            cap: Duration::from_secs(60 * 60),
            rng: Mutex::new(rng),
        }
    }

    /// Jittered delay before the next attempt. `attempts` is the
    /// post-claim-increment value, i.e. the count already consumed.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        // 2^17 minutes is already far past the cap; clamping the exponent
        // keeps the f64 arithmetic well away from infinity.
        let exponent = attempts.min(16) as i32;
        let uncapped = self.base.as_secs_f64() * 2f64.powi(exponent);
        let capped = uncapped.min(self.cap.as_secs_f64());
        let jitter = self.rng.lock().gen_range(JITTER_LOW..=JITTER_HIGH);
        Duration::from_secs_f64(capped * jitter)
    }

    /// Absolute due time for the next attempt.
    pub fn next_attempt_at(&self, now: DateTime<Utc>, attempts: u32) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.delay_for(attempts))
            .unwrap_or_else(|_| chrono::Duration::minutes(75));
        now + delay
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}
