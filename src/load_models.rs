use tokio::time::Duration;

use crate::rate_limiter::planned_query_count;

/// One fixed-duration run at a single target query rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RampStep {
    /// Target queries per second.
    pub target_rate: u32,
    pub duration: Duration,
}

impl RampStep {
    pub fn new(target_rate: u32, duration: Duration) -> Self {
        Self {
            target_rate,
            duration,
        }
    }

    /// Number of queries this step issues: `floor(rate * duration)`.
    pub fn planned_queries(&self) -> u64 {
        planned_query_count(self.target_rate, self.duration)
    }
}

/// Linear rate escalation used for every replica configuration.
///
/// Rates start at `start_rate` and grow by `increment` until they would exceed
/// `end_rate`. Every level runs for `step_duration`.
#[derive(Debug, Clone, PartialEq)]
pub struct RampSchedule {
    pub start_rate: u32,
    pub end_rate: u32,
    pub increment: u32,
    pub step_duration: Duration,
}

impl Default for RampSchedule {
    fn default() -> Self {
        Self {
            start_rate: 10,
            end_rate: 300,
            increment: 10,
            step_duration: Duration::from_secs(60),
        }
    }
}

impl RampSchedule {
    /// The first level, or None when the range is empty.
    pub fn first_step(&self) -> Option<RampStep> {
        if self.start_rate > self.end_rate {
            return None;
        }
        Some(RampStep::new(self.start_rate, self.step_duration))
    }

    /// The level after `current`, or None once the ramp is exhausted.
    ///
    /// A zero increment has no next level rather than repeating forever.
    pub fn next_step(&self, current: &RampStep) -> Option<RampStep> {
        if self.increment == 0 {
            return None;
        }
        let next_rate = current.target_rate.checked_add(self.increment)?;
        if next_rate > self.end_rate {
            return None;
        }
        Some(RampStep::new(next_rate, self.step_duration))
    }

    /// All levels in order.
    pub fn steps(&self) -> impl Iterator<Item = RampStep> + '_ {
        std::iter::successors(self.first_step(), move |step| self.next_step(step))
    }
}
