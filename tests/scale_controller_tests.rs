//! Integration tests for the replica sweep: readiness polling, scale
//! submission, convergence and ramp hand-off.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Duration;

use search_scaletest::errors::{ManagementError, RampError, ScaleError};
use search_scaletest::metrics::STATUS_POLL_FAILURES;
use search_scaletest::ramp::{RampOutcome, RampRunner, RampState, StopReason};
use search_scaletest::scale::{
    PollSettings, ScaleController, ScalePlan, ScaleTarget, ServiceManager, ServiceState,
    ServiceStatus,
};
use search_scaletest::sink::{MemorySink, ResultSink};

/// In-memory service: a scale request is applied after `convergence_polls`
/// further status polls, during which the service reports `Scaling`.
struct StubService {
    state: Mutex<ServiceState>,
    pending: Mutex<Option<(ScaleTarget, u32)>>,
    convergence_polls: u32,
    apply_scale: bool,
    fail_polls: AtomicU32,
    fail_scales: AtomicU32,
    calls: Arc<ServiceCalls>,
}

/// What the controller asked of the stub, shared with the test.
#[derive(Default)]
struct ServiceCalls {
    polls: AtomicU32,
    scales: Mutex<Vec<ScaleTarget>>,
}

impl ServiceCalls {
    fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }

    fn scales(&self) -> Vec<ScaleTarget> {
        self.scales.lock().unwrap().clone()
    }
}

impl StubService {
    fn running(replicas: u32, partitions: u32) -> Self {
        Self {
            state: Mutex::new(ServiceState {
                status: ServiceStatus::Running,
                replica_count: replicas,
                partition_count: partitions,
            }),
            pending: Mutex::new(None),
            convergence_polls: 0,
            apply_scale: true,
            fail_polls: AtomicU32::new(0),
            fail_scales: AtomicU32::new(0),
            calls: Arc::default(),
        }
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl ServiceManager for StubService {
    async fn get_state(&self) -> Result<ServiceState, ManagementError> {
        self.calls.polls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.fail_polls) {
            return Err(ManagementError::UnexpectedStatus {
                status: 503,
                body: "busy".to_string(),
            });
        }

        let mut state = self.state.lock().unwrap();
        let mut pending = self.pending.lock().unwrap();
        *pending = match *pending {
            Some((target, 0)) => {
                state.replica_count = target.replicas;
                state.partition_count = target.partitions;
                state.status = ServiceStatus::Running;
                None
            }
            Some((target, remaining)) => {
                state.status = ServiceStatus::Scaling;
                Some((target, remaining - 1))
            }
            None => None,
        };
        Ok(*state)
    }

    async fn scale(&self, target: ScaleTarget) -> Result<(), ManagementError> {
        if take_failure(&self.fail_scales) {
            return Err(ManagementError::UnexpectedStatus {
                status: 409,
                body: "operation in progress".to_string(),
            });
        }
        self.calls.scales.lock().unwrap().push(target);
        if self.apply_scale {
            *self.pending.lock().unwrap() = Some((target, self.convergence_polls));
        }
        Ok(())
    }
}

/// Records which configurations were ramped and returns a fixed final state.
struct StubRamp {
    final_state: RampState,
    targets: Arc<Mutex<Vec<ScaleTarget>>>,
}

impl StubRamp {
    fn completing() -> Self {
        Self {
            final_state: RampState::Completed,
            targets: Arc::default(),
        }
    }
}

fn ramped(targets: &Mutex<Vec<ScaleTarget>>) -> Vec<ScaleTarget> {
    targets.lock().unwrap().clone()
}

#[async_trait]
impl RampRunner for StubRamp {
    async fn run_ramp(
        &self,
        target: ScaleTarget,
        _sink: &mut dyn ResultSink,
    ) -> Result<RampOutcome, RampError> {
        self.targets.lock().unwrap().push(target);
        Ok(RampOutcome {
            target,
            final_state: self.final_state.clone(),
            results: Vec::new(),
        })
    }
}

fn fast_poll() -> PollSettings {
    PollSettings {
        interval: Duration::from_millis(1),
        settle_delay: Duration::from_millis(1),
        max_wait: None,
    }
}

fn plan(min: u32, max: u32, partitions: u32) -> ScalePlan {
    ScalePlan {
        min_replicas: min,
        max_replicas: max,
        partitions,
    }
}

#[tokio::test]
async fn sweeps_every_replica_count() {
    let service = StubService::running(1, 1);
    let calls = Arc::clone(&service.calls);
    let ramp = StubRamp::completing();
    let targets = Arc::clone(&ramp.targets);
    let controller = ScaleController::new(service, ramp, plan(1, 3, 1), fast_poll());
    let mut sink = MemorySink::default();

    let report = controller.run(&mut sink).await.unwrap();

    assert_eq!(report.outcomes.len(), 3);
    assert_eq!(
        ramped(&targets),
        vec![
            ScaleTarget::new(1, 1),
            ScaleTarget::new(2, 1),
            ScaleTarget::new(3, 1)
        ]
    );
    // Already at 1 replica: only 2 and 3 need a scale request.
    assert_eq!(
        calls.scales(),
        vec![ScaleTarget::new(2, 1), ScaleTarget::new(3, 1)]
    );

    println!("✅ Ramp ran once per replica count");
}

#[tokio::test]
async fn no_scale_request_when_counts_match() {
    let service = StubService::running(2, 1);
    let calls = Arc::clone(&service.calls);
    let ramp = StubRamp::completing();
    let targets = Arc::clone(&ramp.targets);
    let controller = ScaleController::new(service, ramp, plan(2, 2, 1), fast_poll());
    let mut sink = MemorySink::default();

    controller.run(&mut sink).await.unwrap();

    assert!(calls.scales().is_empty());
    assert_eq!(ramped(&targets), vec![ScaleTarget::new(2, 1)]);

    println!("✅ Matching counts skip the scale request");
}

#[tokio::test]
async fn partition_mismatch_triggers_scale() {
    let service = StubService::running(1, 1);
    let calls = Arc::clone(&service.calls);
    let controller =
        ScaleController::new(service, StubRamp::completing(), plan(1, 1, 2), fast_poll());
    let mut sink = MemorySink::default();

    controller.run(&mut sink).await.unwrap();

    assert_eq!(calls.scales(), vec![ScaleTarget::new(1, 2)]);

    println!("✅ Partition count is part of convergence");
}

#[tokio::test]
async fn ramp_waits_for_convergence() {
    let mut service = StubService::running(1, 1);
    service.convergence_polls = 3;
    let calls = Arc::clone(&service.calls);
    let ramp = StubRamp::completing();
    let targets = Arc::clone(&ramp.targets);
    let controller = ScaleController::new(service, ramp, plan(2, 2, 1), fast_poll());
    let mut sink = MemorySink::default();

    controller.run(&mut sink).await.unwrap();

    // 1 readiness poll, 3 polls while scaling, 1 converged poll.
    assert_eq!(calls.polls(), 5);
    assert_eq!(ramped(&targets), vec![ScaleTarget::new(2, 1)]);

    println!("✅ Ramp starts only after the service converged");
}

#[tokio::test]
async fn poll_errors_are_retried() {
    let service = StubService::running(1, 1);
    service.fail_polls.store(2, Ordering::SeqCst);
    service.fail_scales.store(1, Ordering::SeqCst);
    let calls = Arc::clone(&service.calls);
    let controller =
        ScaleController::new(service, StubRamp::completing(), plan(1, 2, 1), fast_poll());
    let mut sink = MemorySink::default();
    let failures_before = STATUS_POLL_FAILURES.get();

    let report = controller.run(&mut sink).await.unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(calls.scales(), vec![ScaleTarget::new(2, 1)]);
    assert!(STATUS_POLL_FAILURES.get() >= failures_before + 3);

    println!("✅ Management API failures are logged and retried");
}

#[tokio::test]
async fn max_wait_bounds_convergence() {
    let mut service = StubService::running(1, 1);
    service.apply_scale = false;
    let ramp = StubRamp::completing();
    let targets = Arc::clone(&ramp.targets);
    let poll = PollSettings {
        max_wait: Some(Duration::from_millis(30)),
        ..fast_poll()
    };
    let controller = ScaleController::new(service, ramp, plan(2, 3, 1), poll);
    let mut sink = MemorySink::default();

    let err = controller.run(&mut sink).await.unwrap_err();

    assert!(matches!(
        err,
        ScaleError::ConvergenceTimeout {
            replicas: 2,
            partitions: 1,
            ..
        }
    ));
    assert!(ramped(&targets).is_empty());

    println!("✅ Convergence wait gives up after max_wait");
}

#[tokio::test]
async fn stopped_ramp_still_advances() {
    let ramp = StubRamp {
        final_state: RampState::Stopped {
            rate: 10,
            reason: StopReason::NoData,
        },
        targets: Arc::default(),
    };
    let targets = Arc::clone(&ramp.targets);
    let controller =
        ScaleController::new(StubService::running(1, 1), ramp, plan(1, 3, 1), fast_poll());
    let mut sink = MemorySink::default();

    let report = controller.run(&mut sink).await.unwrap();

    assert_eq!(ramped(&targets).len(), 3);
    assert!(report
        .outcomes
        .iter()
        .all(|o| matches!(o.final_state, RampState::Stopped { .. })));

    println!("✅ Sweep advances after a stopped ramp");
}

#[tokio::test]
async fn waits_for_running_before_first_ramp() {
    let service = StubService::running(1, 1);
    service.state.lock().unwrap().status = ServiceStatus::Provisioning;
    *service.pending.lock().unwrap() = Some((ScaleTarget::new(1, 1), 2));
    let calls = Arc::clone(&service.calls);
    let controller =
        ScaleController::new(service, StubRamp::completing(), plan(1, 1, 1), fast_poll());
    let mut sink = MemorySink::default();

    controller.run(&mut sink).await.unwrap();

    assert!(calls.polls() >= 3);
    assert!(calls.scales().is_empty());

    println!("✅ Sweep waits for a provisioning service");
}
