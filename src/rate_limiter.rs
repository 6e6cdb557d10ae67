//! Issuance pacing for a single ramp step.
//!
//! Before task `i` (0-based) is issued the observed rate `i / elapsed` must not
//! exceed the target rate `R`. Instead of sleeping and re-checking, the limiter
//! computes the earliest instant at which the condition holds, `t0 + i / R`,
//! and sleeps until that absolute deadline. A late wake-up never accumulates:
//! the next deadline is still measured from `t0`, so a slow scheduler makes the
//! limiter catch up rather than drift.
//!
//! This bounds the observed rate from above. It does not guarantee that
//! queries are evenly spaced: after a stall, tasks whose deadlines have already
//! passed are released back to back.

use tokio::time::{self, Duration, Instant};

/// Number of queries a step at `rate` QPS for `duration` must issue.
pub fn planned_query_count(rate: u32, duration: Duration) -> u64 {
    (rate as f64 * duration.as_secs_f64()).floor() as u64
}

/// Deadline-based pacer for one step. Counters are step-scoped: create a new
/// limiter for every step.
#[derive(Debug)]
pub struct RateLimiter {
    target_rate: f64,
    start: Instant,
    issued: u64,
}

impl RateLimiter {
    /// Create a limiter whose window starts now.
    pub fn new(target_rate: f64) -> Self {
        Self::starting_at(target_rate, Instant::now())
    }

    pub fn starting_at(target_rate: f64, start: Instant) -> Self {
        Self {
            target_rate,
            start,
            issued: 0,
        }
    }

    /// Number of permits handed out so far.
    pub fn issued(&self) -> u64 {
        self.issued
    }

    /// Earliest instant at which the next permit keeps the rate at or below
    /// the target.
    pub fn next_deadline(&self) -> Instant {
        if !(self.target_rate > 0.0 && self.target_rate.is_finite()) {
            // Unconstrained, same as an unlimited load model.
            return self.start;
        }
        self.start + Duration::from_secs_f64(self.issued as f64 / self.target_rate)
    }

    /// Wait until the next task may be issued, then count it as issued.
    pub async fn acquire(&mut self) {
        // If the deadline is already in the past sleep_until returns
        // immediately and the caller catches up.
        time::sleep_until(self.next_deadline()).await;
        self.issued += 1;
    }
}
