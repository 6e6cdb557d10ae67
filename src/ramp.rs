//! Rate escalation for one replica/partition configuration.
//!
//! ```text
//! Ramping(start) --step ok--> Ramping(rate + increment) --rate > end--> Completed
//!        \                                   \
//!         +--threshold breach / no data-------+--> Stopped
//! ```
//!
//! Every level runs the step runner for the step duration, aggregates the
//! samples, writes a [`RunResult`] to the sink and then decides whether to
//! escalate. Both terminal states hand control back to the scale controller.

use async_trait::async_trait;
use std::fmt;
use tracing::{info, warn};

use crate::errors::RampError;
use crate::load_models::{RampSchedule, RampStep};
use crate::metrics::{RAMP_STEPS_TOTAL, TARGET_RATE};
use crate::percentiles::{RunStats, StatsAggregator};
use crate::scale::ScaleTarget;
use crate::sink::{ResultSink, RunResult};
use crate::worker::{StepOutput, StepRunner};

/// Limits whose breach stops escalation for the current configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopThresholds {
    /// Minimum fraction of successful queries (0.0..=1.0)
    pub min_success_ratio: f64,
    /// Maximum mean latency in milliseconds
    pub max_avg_latency_ms: f64,
}

impl Default for StopThresholds {
    fn default() -> Self {
        Self {
            min_success_ratio: 0.97,
            max_avg_latency_ms: 1000.0,
        }
    }
}

impl StopThresholds {
    /// Returns the first breached limit, if any.
    pub fn evaluate(&self, stats: &RunStats) -> Option<StopReason> {
        let success_ratio = stats.success_ratio();
        if success_ratio < self.min_success_ratio {
            return Some(StopReason::SuccessRatio {
                observed: success_ratio,
                threshold: self.min_success_ratio,
            });
        }
        if stats.avg_latency > self.max_avg_latency_ms {
            return Some(StopReason::AverageLatency {
                observed_ms: stats.avg_latency,
                ceiling_ms: self.max_avg_latency_ms,
            });
        }
        None
    }
}

/// Why a ramp stopped before reaching its end rate.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    SuccessRatio { observed: f64, threshold: f64 },
    AverageLatency { observed_ms: f64, ceiling_ms: f64 },
    /// The step produced no samples, so it could not be evaluated.
    NoData,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::SuccessRatio {
                observed,
                threshold,
            } => write!(
                f,
                "success ratio {:.4} below {:.4}",
                observed, threshold
            ),
            StopReason::AverageLatency {
                observed_ms,
                ceiling_ms,
            } => write!(
                f,
                "average latency {:.2}ms above {:.2}ms",
                observed_ms, ceiling_ms
            ),
            StopReason::NoData => write!(f, "step produced no samples"),
        }
    }
}

/// State of a ramp for a single configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum RampState {
    Ramping { rate: u32 },
    Stopped { rate: u32, reason: StopReason },
    Completed,
}

impl RampState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RampState::Ramping { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            RampState::Ramping { .. } => "ramping",
            RampState::Stopped { .. } => "stopped",
            RampState::Completed => "completed",
        }
    }
}

/// Result of running a full ramp for one configuration.
#[derive(Debug, Clone)]
pub struct RampOutcome {
    pub target: ScaleTarget,
    pub final_state: RampState,
    /// Results in the order they were written to the sink
    pub results: Vec<RunResult>,
}

impl RampOutcome {
    /// Highest rate that was run, if any.
    pub fn max_rate_run(&self) -> Option<u32> {
        self.results.iter().map(|r| r.target_rate).max()
    }
}

/// Runs the ramp for one configuration. Implemented by [`RampController`];
/// the scale controller depends only on this seam.
#[async_trait]
pub trait RampRunner: Send + Sync {
    async fn run_ramp(
        &self,
        target: ScaleTarget,
        sink: &mut dyn ResultSink,
    ) -> Result<RampOutcome, RampError>;
}

pub struct RampController<R> {
    runner: R,
    schedule: RampSchedule,
    thresholds: StopThresholds,
    success_status: u16,
    service_name: String,
}

impl<R: StepRunner> RampController<R> {
    pub fn new(
        runner: R,
        schedule: RampSchedule,
        thresholds: StopThresholds,
        success_status: u16,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            schedule,
            thresholds,
            success_status,
            service_name: service_name.into(),
        }
    }

    fn build_result(
        &self,
        target: ScaleTarget,
        step: &RampStep,
        output: &StepOutput,
        stats: &RunStats,
    ) -> RunResult {
        RunResult {
            service_name: self.service_name.clone(),
            replica_count: target.replicas,
            partition_count: target.partitions,
            target_rate: step.target_rate,
            target_duration: step.duration.as_secs_f64(),
            actual_duration: output.elapsed.as_secs_f64(),
            target_query_count: step.planned_queries(),
            actual_query_count: stats.total,
            success_count: stats.success_count,
            fail_count: stats.fail_count,
            avg_latency: stats.avg_latency,
            p25: stats.p25,
            p75: stats.p75,
            p90: stats.p90,
            p95: stats.p95,
            p99: stats.p99,
            timestamp: output.started_at,
        }
    }
}

#[async_trait]
impl<R: StepRunner> RampRunner for RampController<R> {
    async fn run_ramp(
        &self,
        target: ScaleTarget,
        sink: &mut dyn ResultSink,
    ) -> Result<RampOutcome, RampError> {
        let mut results = Vec::new();
        let mut current = self.schedule.first_step();
        let mut state = match current {
            Some(step) => RampState::Ramping {
                rate: step.target_rate,
            },
            None => RampState::Completed,
        };

        while let Some(step) = current {
            TARGET_RATE.set(step.target_rate as i64);
            info!(
                replicas = target.replicas,
                partitions = target.partitions,
                target_rate = step.target_rate,
                duration_secs = step.duration.as_secs(),
                planned_queries = step.planned_queries(),
                "Starting ramp step"
            );

            let output = self.runner.run_step(&step).await;
            let stats = match StatsAggregator::from_samples(
                self.success_status,
                output.samples.iter().copied(),
            )
            .summarize()
            {
                Ok(stats) => stats,
                Err(e) => {
                    warn!(
                        target_rate = step.target_rate,
                        error = %e,
                        "Ramp step cannot be evaluated, stopping ramp"
                    );
                    RAMP_STEPS_TOTAL.with_label_values(&["no_data"]).inc();
                    state = RampState::Stopped {
                        rate: step.target_rate,
                        reason: StopReason::NoData,
                    };
                    break;
                }
            };

            let result = self.build_result(target, &step, &output, &stats);
            sink.append(&result)?;
            println!(
                "\n{} replicas / {} partitions\n{}\n",
                target.replicas,
                target.partitions,
                result.format_report()
            );
            info!(
                target_rate = step.target_rate,
                stats = %stats.format(),
                "Ramp step complete"
            );
            results.push(result);

            if let Some(reason) = self.thresholds.evaluate(&stats) {
                info!(
                    replicas = target.replicas,
                    target_rate = step.target_rate,
                    reason = %reason,
                    "Stop condition reached"
                );
                RAMP_STEPS_TOTAL.with_label_values(&["stopped"]).inc();
                state = RampState::Stopped {
                    rate: step.target_rate,
                    reason,
                };
                break;
            }
            RAMP_STEPS_TOTAL.with_label_values(&["continue"]).inc();

            current = self.schedule.next_step(&step);
            state = match current {
                Some(next) => RampState::Ramping {
                    rate: next.target_rate,
                },
                None => RampState::Completed,
            };
        }

        Ok(RampOutcome {
            target,
            final_state: state,
            results,
        })
    }
}
