//! Durable results log.
//!
//! One [`RunResult`] row per (replica count, target rate) step is appended to
//! a CSV file with a fixed header. The file is recreated when a sweep starts
//! and flushed after every row so an interrupted sweep keeps what it measured.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::errors::SinkError;

/// Column names of the results log, in field order of [`RunResult`].
pub const RESULT_HEADER: [&str; 17] = [
    "Service Name",
    "Replicas",
    "Partitions",
    "Target QPS",
    "Target Duration",
    "Actual Duration",
    "Target Queries",
    "Actual Queries",
    "Successful Queries",
    "Failed Queries",
    "Avg Latency",
    "Latency25",
    "Latency75",
    "Latency90",
    "Latency95",
    "Latency99",
    "Time (UTC)",
];

/// Summary of one ramp step. Field order defines the CSV column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    #[serde(rename = "Service Name")]
    pub service_name: String,
    #[serde(rename = "Replicas")]
    pub replica_count: u32,
    #[serde(rename = "Partitions")]
    pub partition_count: u32,
    #[serde(rename = "Target QPS")]
    pub target_rate: u32,
    /// Seconds
    #[serde(rename = "Target Duration")]
    pub target_duration: f64,
    /// Seconds, first issue to last completion
    #[serde(rename = "Actual Duration")]
    pub actual_duration: f64,
    #[serde(rename = "Target Queries")]
    pub target_query_count: u64,
    #[serde(rename = "Actual Queries")]
    pub actual_query_count: u64,
    #[serde(rename = "Successful Queries")]
    pub success_count: u64,
    #[serde(rename = "Failed Queries")]
    pub fail_count: u64,
    /// Milliseconds, over all samples
    #[serde(rename = "Avg Latency")]
    pub avg_latency: f64,
    #[serde(rename = "Latency25")]
    pub p25: f64,
    #[serde(rename = "Latency75")]
    pub p75: f64,
    #[serde(rename = "Latency90")]
    pub p90: f64,
    #[serde(rename = "Latency95")]
    pub p95: f64,
    #[serde(rename = "Latency99")]
    pub p99: f64,
    /// Step start
    #[serde(rename = "Time (UTC)")]
    pub timestamp: DateTime<Utc>,
}

impl RunResult {
    pub fn success_ratio(&self) -> f64 {
        if self.actual_query_count == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.actual_query_count as f64
    }

    /// Multi-line console report for one step.
    pub fn format_report(&self) -> String {
        format!(
            "Target QPS: {}\n\
             Target Duration: {:.0}s\n\
             Actual Duration: {:.2}s\n\
             Target Queries: {}\n\
             Actual Queries: {}\n\
             Successful Queries: {}\n\
             Failed Queries: {}\n\
             Percent Successful: {:.2}\n\
             Average Latency: {:.2}ms\n\
             Latency 25th Percentile: {:.2}ms\n\
             Latency 75th Percentile: {:.2}ms\n\
             Latency 90th Percentile: {:.2}ms\n\
             Latency 95th Percentile: {:.2}ms\n\
             Latency 99th Percentile: {:.2}ms",
            self.target_rate,
            self.target_duration,
            self.actual_duration,
            self.target_query_count,
            self.actual_query_count,
            self.success_count,
            self.fail_count,
            self.success_ratio() * 100.0,
            self.avg_latency,
            self.p25,
            self.p75,
            self.p90,
            self.p95,
            self.p99,
        )
    }
}

/// Append-only destination for run results.
pub trait ResultSink: Send {
    fn append(&mut self, result: &RunResult) -> Result<(), SinkError>;
}

/// File name used for a sweep's log, e.g. `svc-1r1p-202401311530.csv`.
pub fn log_file_name(
    service_name: &str,
    replicas: u32,
    partitions: u32,
    started: DateTime<Utc>,
) -> String {
    format!(
        "{}-{}r{}p-{}.csv",
        service_name,
        replicas,
        partitions,
        started.format("%Y%m%d%H%M")
    )
}

/// CSV results log.
pub struct CsvResultSink {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl CsvResultSink {
    /// Create (or truncate) the log at `path` and write the header.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = File::create(&path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record(RESULT_HEADER)?;
        writer.flush()?;

        info!(path = ?path, "Results log created");
        Ok(Self { path, writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for CsvResultSink {
    fn append(&mut self, result: &RunResult) -> Result<(), SinkError> {
        self.writer.serialize(result)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// In-memory sink, for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub results: Vec<RunResult>,
}

impl ResultSink for MemorySink {
    fn append(&mut self, result: &RunResult) -> Result<(), SinkError> {
        self.results.push(result.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn result(rate: u32) -> RunResult {
        RunResult {
            service_name: "svc".to_string(),
            replica_count: 2,
            partition_count: 1,
            target_rate: rate,
            target_duration: 60.0,
            actual_duration: 61.5,
            target_query_count: rate as u64 * 60,
            actual_query_count: rate as u64 * 60,
            success_count: rate as u64 * 60 - 3,
            fail_count: 3,
            avg_latency: 120.5,
            p25: 80.0,
            p75: 140.0,
            p90: 200.0,
            p95: 260.0,
            p99: 400.0,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 31, 15, 30, 0).unwrap(),
        }
    }

    #[test]
    fn header_has_one_column_per_field() {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(vec![]);
        writer.serialize(result(10)).unwrap();
        let row = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        assert_eq!(row.trim_end().split(',').count(), RESULT_HEADER.len());
    }

    #[test]
    fn log_file_name_format() {
        let started = Utc.with_ymd_and_hms(2024, 1, 31, 15, 30, 59).unwrap();
        assert_eq!(log_file_name("svc", 1, 1, started), "svc-1r1p-202401311530.csv");
    }

    #[test]
    fn csv_sink_writes_header_and_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("results.csv");

        let mut sink = CsvResultSink::create(&path).unwrap();
        sink.append(&result(10)).unwrap();
        sink.append(&result(20)).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let header: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(header, RESULT_HEADER);

        let rows: Vec<RunResult> = reader.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(rows, vec![result(10), result(20)]);
    }

    #[test]
    fn csv_sink_truncates_existing_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("results.csv");
        fs::write(&path, "stale,data\n1,2\n").unwrap();

        let sink = CsvResultSink::create(&path).unwrap();
        drop(sink);

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.starts_with("Service Name,Replicas"));
    }

    #[test]
    fn report_shows_success_percent() {
        let report = result(10).format_report();
        assert!(report.contains("Target QPS: 10"));
        assert!(report.contains("Percent Successful: 99.50"));
    }
}
