//! Integration tests for rate escalation and stop conditions.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;
use tokio::time::Duration;

use search_scaletest::load_models::{RampSchedule, RampStep};
use search_scaletest::ramp::{RampController, RampRunner, RampState, StopReason, StopThresholds};
use search_scaletest::scale::ScaleTarget;
use search_scaletest::sink::{CsvResultSink, MemorySink, RunResult};
use search_scaletest::worker::{QuerySample, StepOutput, StepRunner, FAILED_STATUS};

/// Rates a runner was asked to run, shared with the test.
type RateLog = Arc<Mutex<Vec<u32>>>;

/// Returns pre-scripted samples, one batch per step, and records the rates it ran.
struct ScriptedRunner {
    batches: Mutex<VecDeque<Vec<QuerySample>>>,
    rates: RateLog,
}

#[async_trait]
impl StepRunner for ScriptedRunner {
    async fn run_step(&self, step: &RampStep) -> StepOutput {
        self.rates.lock().unwrap().push(step.target_rate);
        let samples = self.batches.lock().unwrap().pop_front().unwrap_or_default();
        StepOutput {
            samples,
            started_at: Utc::now(),
            elapsed: step.duration,
        }
    }
}

fn batch(successes: usize, failures: usize, latency_ms: u64) -> Vec<QuerySample> {
    let now = Utc::now();
    let mut samples = vec![QuerySample::new(now, 200, latency_ms); successes];
    samples.extend(vec![QuerySample::new(now, FAILED_STATUS, latency_ms); failures]);
    samples
}

fn schedule() -> RampSchedule {
    RampSchedule {
        start_rate: 10,
        end_rate: 30,
        increment: 10,
        step_duration: Duration::from_secs(10),
    }
}

fn controller(batches: Vec<Vec<QuerySample>>) -> (RampController<ScriptedRunner>, RateLog) {
    let rates = RateLog::default();
    let runner = ScriptedRunner {
        batches: Mutex::new(batches.into()),
        rates: Arc::clone(&rates),
    };
    let ramp = RampController::new(runner, schedule(), StopThresholds::default(), 200, "svc");
    (ramp, rates)
}

const TARGET: ScaleTarget = ScaleTarget {
    replicas: 2,
    partitions: 1,
};

#[tokio::test]
async fn low_success_ratio_stops_after_first_level() {
    let (ramp, rates) = controller(vec![batch(50, 50, 100), batch(100, 0, 100)]);
    let mut sink = MemorySink::default();

    let outcome = ramp.run_ramp(TARGET, &mut sink).await.unwrap();

    assert!(matches!(
        outcome.final_state,
        RampState::Stopped {
            rate: 10,
            reason: StopReason::SuccessRatio { .. }
        }
    ));
    assert_eq!(ramp_rates(&rates), vec![10]);
    assert_eq!(sink.results.len(), 1);
    assert_eq!(sink.results[0].success_count, 50);
    assert_eq!(sink.results[0].fail_count, 50);

    println!("✅ Ramp stops when success ratio drops below threshold");
}

#[tokio::test]
async fn success_ratio_boundary_continues_then_stops() {
    let (ramp, rates) = controller(vec![batch(97, 3, 500), batch(96, 4, 500)]);
    let mut sink = MemorySink::default();

    let outcome = ramp.run_ramp(TARGET, &mut sink).await.unwrap();

    assert_eq!(ramp_rates(&rates), vec![10, 20]);
    assert!(matches!(
        outcome.final_state,
        RampState::Stopped { rate: 20, .. }
    ));
    assert_eq!(outcome.results.len(), 2);
    assert_eq!(outcome.max_rate_run(), Some(20));

    println!("✅ 97% continues, 96% stops");
}

#[tokio::test]
async fn high_average_latency_stops() {
    let (ramp, rates) = controller(vec![batch(100, 0, 1500), batch(100, 0, 50)]);
    let mut sink = MemorySink::default();

    let outcome = ramp.run_ramp(TARGET, &mut sink).await.unwrap();

    assert!(matches!(
        outcome.final_state,
        RampState::Stopped {
            reason: StopReason::AverageLatency { .. },
            ..
        }
    ));
    assert_eq!(sink.results.len(), 1);
    assert_eq!(ramp_rates(&rates), vec![10]);

    println!("✅ Ramp stops on average latency");
}

#[tokio::test]
async fn healthy_ramp_completes_at_end_rate() {
    let (ramp, rates) = controller(vec![
        batch(100, 0, 50),
        batch(100, 0, 60),
        batch(100, 0, 70),
    ]);
    let mut sink = MemorySink::default();

    let outcome = ramp.run_ramp(TARGET, &mut sink).await.unwrap();

    assert_eq!(outcome.final_state, RampState::Completed);
    assert_eq!(ramp_rates(&rates), vec![10, 20, 30]);

    let written: Vec<u32> = sink.results.iter().map(|r| r.target_rate).collect();
    assert_eq!(written, vec![10, 20, 30]);
    for result in &sink.results {
        assert_eq!(result.service_name, "svc");
        assert_eq!(result.replica_count, 2);
        assert_eq!(result.partition_count, 1);
        assert_eq!(result.target_duration, 10.0);
        assert_eq!(result.target_query_count, result.target_rate as u64 * 10);
        assert_eq!(result.actual_query_count, 100);
    }

    println!("✅ Ramp completes when no stop condition is hit");
}

#[tokio::test]
async fn empty_step_stops_without_writing_a_row() {
    let (ramp, rates) = controller(vec![Vec::new(), batch(100, 0, 50)]);
    let mut sink = MemorySink::default();

    let outcome = ramp.run_ramp(TARGET, &mut sink).await.unwrap();

    assert_eq!(
        outcome.final_state,
        RampState::Stopped {
            rate: 10,
            reason: StopReason::NoData
        }
    );
    assert!(sink.results.is_empty());
    assert!(outcome.max_rate_run().is_none());
    assert_eq!(ramp_rates(&rates), vec![10]);

    println!("✅ A step with no samples stops the ramp");
}

#[tokio::test]
async fn results_reach_the_csv_log() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("svc-2r1p-202401311530.csv");
    let mut sink = CsvResultSink::create(&path).unwrap();

    let (ramp, _rates) = controller(vec![batch(100, 0, 50), batch(90, 10, 50)]);
    let outcome = ramp.run_ramp(TARGET, &mut sink).await.unwrap();
    drop(sink);

    let mut reader = csv::Reader::from_path(&path).unwrap();
    let rows: Vec<RunResult> = reader.deserialize().map(|r| r.unwrap()).collect();
    assert_eq!(rows, outcome.results);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].fail_count, 10);

    println!("✅ Every evaluated step is appended to the results log");
}

fn ramp_rates(rates: &RateLog) -> Vec<u32> {
    rates.lock().unwrap().clone()
}
