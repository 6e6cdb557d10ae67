//! Replica sweep: the outer loop of a scale test.
//!
//! For every replica count in the plan the controller waits for the service
//! to report `Running`, submits a scale request when the observed counts
//! differ from the target, and then polls until the service is `Running`
//! with the target counts before starting the ramp. Scale requests are
//! fire-and-forget: their effect is only ever observed through polling.

use async_trait::async_trait;
use std::fmt;
use tokio::time::{sleep, Duration, Instant};
use tracing::{error, info, warn};

use crate::errors::{ManagementError, ScaleError};
use crate::metrics::{CURRENT_REPLICAS, STATUS_POLL_FAILURES};
use crate::ramp::{RampOutcome, RampRunner};
use crate::sink::ResultSink;

/// Replica/partition configuration under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScaleTarget {
    pub replicas: u32,
    pub partitions: u32,
}

impl ScaleTarget {
    pub fn new(replicas: u32, partitions: u32) -> Self {
        Self {
            replicas,
            partitions,
        }
    }
}

impl fmt::Display for ScaleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}r{}p", self.replicas, self.partitions)
    }
}

/// Lifecycle status reported by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Provisioning,
    Running,
    Scaling,
    Failed,
}

impl ServiceStatus {
    /// Map a status string from the management API, case-insensitively.
    pub fn from_api_value(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "running" => Some(ServiceStatus::Running),
            "provisioning" => Some(ServiceStatus::Provisioning),
            "scaling" => Some(ServiceStatus::Scaling),
            "failed" | "error" | "degraded" | "disabled" => Some(ServiceStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Provisioning => "provisioning",
            ServiceStatus::Running => "running",
            ServiceStatus::Scaling => "scaling",
            ServiceStatus::Failed => "failed",
        }
    }
}

/// One observation of the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceState {
    pub status: ServiceStatus,
    pub replica_count: u32,
    pub partition_count: u32,
}

impl ServiceState {
    pub fn is_running(&self) -> bool {
        self.status == ServiceStatus::Running
    }

    /// True when the observed counts equal `target`.
    pub fn matches(&self, target: ScaleTarget) -> bool {
        self.replica_count == target.replicas && self.partition_count == target.partitions
    }
}

/// Resource-management operations the sweep needs.
#[async_trait]
pub trait ServiceManager: Send + Sync {
    async fn get_state(&self) -> Result<ServiceState, ManagementError>;

    /// Submit a scale request. Returning Ok means the request was accepted,
    /// not that the service has changed.
    async fn scale(&self, target: ScaleTarget) -> Result<(), ManagementError>;

    async fn status(&self) -> Result<ServiceStatus, ManagementError> {
        Ok(self.get_state().await?.status)
    }

    async fn replica_count(&self) -> Result<u32, ManagementError> {
        Ok(self.get_state().await?.replica_count)
    }
}

/// Replica counts to sweep, inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalePlan {
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub partitions: u32,
}

impl Default for ScalePlan {
    fn default() -> Self {
        Self {
            min_replicas: 1,
            max_replicas: 5,
            partitions: 1,
        }
    }
}

impl ScalePlan {
    pub fn targets(&self) -> impl Iterator<Item = ScaleTarget> + '_ {
        (self.min_replicas..=self.max_replicas)
            .map(move |replicas| ScaleTarget::new(replicas, self.partitions))
    }
}

/// Timing of the status-polling waits.
#[derive(Debug, Clone, PartialEq)]
pub struct PollSettings {
    /// Fixed backoff between polls and between failed scale submissions
    pub interval: Duration,
    /// Pause after a scale request is accepted, before polling resumes
    pub settle_delay: Duration,
    /// Upper bound for a single wait; None waits indefinitely
    pub max_wait: Option<Duration>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            settle_delay: Duration::from_secs(2),
            max_wait: None,
        }
    }
}

/// What a sweep measured, one outcome per configuration.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub outcomes: Vec<RampOutcome>,
}

impl SweepReport {
    pub fn total_steps(&self) -> usize {
        self.outcomes.iter().map(|o| o.results.len()).sum()
    }
}

pub struct ScaleController<M, R> {
    manager: M,
    ramp: R,
    plan: ScalePlan,
    poll: PollSettings,
}

impl<M: ServiceManager, R: RampRunner> ScaleController<M, R> {
    pub fn new(manager: M, ramp: R, plan: ScalePlan, poll: PollSettings) -> Self {
        Self {
            manager,
            ramp,
            plan,
            poll,
        }
    }

    /// Run the full sweep. Every configuration is ramped, whether or not the
    /// previous one stopped early.
    pub async fn run(&self, sink: &mut dyn ResultSink) -> Result<SweepReport, ScaleError> {
        let mut report = SweepReport::default();

        for target in self.plan.targets() {
            CURRENT_REPLICAS.set(target.replicas as i64);

            let observed = self.wait_for_service(target, |_| true).await?;
            if !observed.matches(target) {
                info!(
                    from_replicas = observed.replica_count,
                    from_partitions = observed.partition_count,
                    to_replicas = target.replicas,
                    to_partitions = target.partitions,
                    "Resizing service"
                );
                self.submit_scale(target).await?;
                sleep(self.poll.settle_delay).await;
                self.wait_for_service(target, |state| state.matches(target))
                    .await?;
            }

            info!(
                replicas = target.replicas,
                partitions = target.partitions,
                "Service ready, starting ramp"
            );
            let outcome = self.ramp.run_ramp(target, sink).await?;
            info!(
                replicas = target.replicas,
                final_state = outcome.final_state.label(),
                steps = outcome.results.len(),
                max_rate = ?outcome.max_rate_run(),
                "Ramp finished"
            );
            report.outcomes.push(outcome);
        }

        info!(
            configurations = report.outcomes.len(),
            steps = report.total_steps(),
            "Sweep finished"
        );
        Ok(report)
    }

    /// Poll until the service is `Running` and `converged` holds.
    async fn wait_for_service<F>(
        &self,
        target: ScaleTarget,
        converged: F,
    ) -> Result<ServiceState, ScaleError>
    where
        F: Fn(&ServiceState) -> bool + Send + Sync,
    {
        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.manager.get_state().await {
                Ok(state) if state.is_running() && converged(&state) => return Ok(state),
                Ok(state) => {
                    info!(
                        status = state.status.as_str(),
                        replicas = state.replica_count,
                        partitions = state.partition_count,
                        target = %target,
                        attempt,
                        "Waiting for service to be ready"
                    );
                }
                Err(e) => {
                    STATUS_POLL_FAILURES.inc();
                    warn!(error = %e, attempt, "Failed to poll service status, retrying");
                }
            }

            self.check_deadline(target, started)?;
            sleep(self.poll.interval).await;
        }
    }

    /// Submit a scale request, retrying until the management API accepts it.
    async fn submit_scale(&self, target: ScaleTarget) -> Result<(), ScaleError> {
        let started = Instant::now();
        loop {
            match self.manager.scale(target).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    STATUS_POLL_FAILURES.inc();
                    error!(error = %e, target = %target, "Scale request failed, retrying");
                }
            }
            self.check_deadline(target, started)?;
            sleep(self.poll.interval).await;
        }
    }

    fn check_deadline(&self, target: ScaleTarget, started: Instant) -> Result<(), ScaleError> {
        match self.poll.max_wait {
            Some(max_wait) if started.elapsed() >= max_wait => Err(ScaleError::ConvergenceTimeout {
                replicas: target.replicas,
                partitions: target.partitions,
                waited: started.elapsed(),
            }),
            _ => Ok(()),
        }
    }
}
