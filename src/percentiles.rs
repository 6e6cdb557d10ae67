//! Run statistics: success counts, mean latency and interpolated percentiles.
//!
//! Percentiles use rank interpolation (the spreadsheet `PERCENTILE`
//! convention): the value at 1-indexed rank `(N-1)*p + 1` of the sorted
//! latencies, linearly interpolated between neighbouring samples.
//!
//! A [`StatsAggregator`] is owned by exactly one ramp step. Aggregation is
//! commutative and associative, so completion order of the query tasks does
//! not affect the result.

use crate::errors::StatsError;
use crate::worker::QuerySample;

/// Percentiles reported for every run, in column order.
pub const REPORTED_PERCENTILES: [f64; 5] = [0.25, 0.75, 0.90, 0.95, 0.99];

/// Computes the interpolated percentile `p` (0.0..=1.0) of `values`.
///
/// The input does not need to be sorted.
pub fn percentile(values: &[f64], p: f64) -> Result<f64, StatsError> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    percentile_of_sorted(&sorted, p)
}

/// Computes the interpolated percentile `p` of an ascending slice.
pub fn percentile_of_sorted(sorted: &[f64], p: f64) -> Result<f64, StatsError> {
    if !(0.0..=1.0).contains(&p) {
        return Err(StatsError::InvalidPercentile(p));
    }
    let len = sorted.len();
    if len == 0 {
        return Err(StatsError::NoData);
    }

    let n = (len - 1) as f64 * p + 1.0;
    if n == 1.0 {
        return Ok(sorted[0]);
    }
    if n >= len as f64 {
        return Ok(sorted[len - 1]);
    }

    let k = n.floor() as usize;
    let d = n - k as f64;
    Ok(sorted[k - 1] + d * (sorted[k] - sorted[k - 1]))
}

/// Statistical fields of a single run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStats {
    /// Number of samples (successful and failed)
    pub total: u64,

    pub success_count: u64,

    pub fail_count: u64,

    /// Mean latency over all samples, failures included (milliseconds)
    pub avg_latency: f64,

    pub p25: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl RunStats {
    /// Fraction of samples that returned the success status (0.0..=1.0).
    pub fn success_ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.success_count as f64 / self.total as f64
    }

    /// Format statistics as a human-readable string.
    pub fn format(&self) -> String {
        format!(
            "count={}, success={}, failed={}, avg={:.2}ms, p25={:.2}ms, p75={:.2}ms, p90={:.2}ms, p95={:.2}ms, p99={:.2}ms",
            self.total,
            self.success_count,
            self.fail_count,
            self.avg_latency,
            self.p25,
            self.p75,
            self.p90,
            self.p95,
            self.p99,
        )
    }
}

/// Collects the samples of one run and summarizes them.
#[derive(Debug, Clone)]
pub struct StatsAggregator {
    success_code: u16,
    latencies: Vec<f64>,
    success_count: u64,
    latency_sum_ms: u128,
}

impl StatsAggregator {
    /// Create an empty aggregator that counts `success_code` as success.
    pub fn new(success_code: u16) -> Self {
        Self {
            success_code,
            latencies: Vec::new(),
            success_count: 0,
            latency_sum_ms: 0,
        }
    }

    /// Build an aggregator from a complete sample set.
    pub fn from_samples<I>(success_code: u16, samples: I) -> Self
    where
        I: IntoIterator<Item = QuerySample>,
    {
        let mut aggregator = Self::new(success_code);
        for sample in samples {
            aggregator.record(sample);
        }
        aggregator
    }

    /// Record one sample. The sample is consumed.
    pub fn record(&mut self, sample: QuerySample) {
        if sample.status_code == self.success_code {
            self.success_count += 1;
        }
        self.latency_sum_ms += sample.latency_ms as u128;
        self.latencies.push(sample.latency_ms as f64);
    }

    /// Fold another aggregator's samples into this one.
    pub fn merge(&mut self, other: StatsAggregator) {
        self.success_count += other.success_count;
        self.latency_sum_ms += other.latency_sum_ms;
        self.latencies.extend(other.latencies);
    }

    /// Number of samples recorded so far.
    pub fn len(&self) -> usize {
        self.latencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latencies.is_empty()
    }

    /// Compute the run statistics.
    ///
    /// Returns [`StatsError::NoData`] when no samples were recorded.
    pub fn summarize(&self) -> Result<RunStats, StatsError> {
        if self.latencies.is_empty() {
            return Err(StatsError::NoData);
        }

        let mut sorted = self.latencies.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let total = sorted.len() as u64;
        let [p25, p75, p90, p95, p99] = [
            percentile_of_sorted(&sorted, REPORTED_PERCENTILES[0])?,
            percentile_of_sorted(&sorted, REPORTED_PERCENTILES[1])?,
            percentile_of_sorted(&sorted, REPORTED_PERCENTILES[2])?,
            percentile_of_sorted(&sorted, REPORTED_PERCENTILES[3])?,
            percentile_of_sorted(&sorted, REPORTED_PERCENTILES[4])?,
        ];

        Ok(RunStats {
            total,
            success_count: self.success_count,
            fail_count: total - self.success_count,
            avg_latency: self.latency_sum_ms as f64 / total as f64,
            p25,
            p75,
            p90,
            p95,
            p99,
        })
    }
}
