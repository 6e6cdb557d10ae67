use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::data_source::QuerySource;
use crate::errors::ErrorCategory;
use crate::load_models::RampStep;
use crate::metrics::{
    CONCURRENT_QUERIES, QUERIES_TOTAL, QUERY_ERRORS_BY_CATEGORY, QUERY_LATENCY_SECONDS,
    QUERY_STATUS_CODES,
};
use crate::rate_limiter::RateLimiter;

/// Status recorded for a query that produced no usable response: transport
/// failure, missing latency header, or a worker task that died.
pub const FAILED_STATUS: u16 = 0;

/// Outcome of one search query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySample {
    pub issued_at: DateTime<Utc>,
    pub status_code: u16,
    /// Server-reported latency, or the client-observed latency for failed samples.
    pub latency_ms: u64,
}

impl QuerySample {
    pub fn new(issued_at: DateTime<Utc>, status_code: u16, latency_ms: u64) -> Self {
        Self {
            issued_at,
            status_code,
            latency_ms,
        }
    }

    /// A sample for a query that produced no usable response.
    pub fn failed(issued_at: DateTime<Utc>, latency_ms: u64) -> Self {
        Self::new(issued_at, FAILED_STATUS, latency_ms)
    }

    pub fn is_failed(&self) -> bool {
        self.status_code == FAILED_STATUS
    }
}

/// Performs one query and reports its outcome. Never fails: every error is
/// folded into the returned sample.
#[async_trait]
pub trait QueryExecutor: Send + Sync + 'static {
    async fn execute(&self) -> QuerySample;
}

/// Where and how search queries are sent.
#[derive(Debug, Clone)]
pub struct SearchQueryConfig {
    /// Service root, e.g. `https://my-service.search.windows.net`
    pub endpoint: String,
    pub index_name: String,
    pub api_version: String,
    /// Extra query-string parameters added to every request
    pub extra_params: Vec<(String, String)>,
    /// Response header carrying the server-side latency in milliseconds
    pub latency_header: String,
    pub success_status: u16,
}

impl SearchQueryConfig {
    /// Full URL of the index documents endpoint.
    pub fn docs_url(&self) -> String {
        format!(
            "{}/indexes/{}/docs",
            self.endpoint.trim_end_matches('/'),
            self.index_name
        )
    }
}

/// Sends GET search requests with a random term and reads the latency the
/// service reports in a response header.
pub struct SearchQueryExecutor {
    client: reqwest::Client,
    config: SearchQueryConfig,
    queries: QuerySource,
    url: String,
}

impl SearchQueryExecutor {
    pub fn new(client: reqwest::Client, config: SearchQueryConfig, queries: QuerySource) -> Self {
        let url = config.docs_url();
        Self {
            client,
            config,
            queries,
            url,
        }
    }
}

#[async_trait]
impl QueryExecutor for SearchQueryExecutor {
    async fn execute(&self) -> QuerySample {
        let issued_at = Utc::now();
        let request_start_time = Instant::now();

        CONCURRENT_QUERIES.inc();
        QUERIES_TOTAL.inc();

        let term = self.queries.random_term();
        let request = self
            .client
            .get(&self.url)
            .query(&[
                ("api-version", self.config.api_version.as_str()),
                ("search", term),
            ])
            .query(&self.config.extra_params);

        let sample = match request.send().await {
            Ok(mut response) => {
                let status = response.status().as_u16();
                let reported_latency =
                    parse_latency_header(response.headers(), &self.config.latency_header);

                // Drain the body so the connection goes back to the pool.
                while let Ok(Some(_chunk)) = response.chunk().await {}

                QUERY_STATUS_CODES
                    .with_label_values(&[status_code_label(status)])
                    .inc();

                match reported_latency {
                    Some(latency_ms) => {
                        if let Some(category) =
                            ErrorCategory::from_status_code(status, self.config.success_status)
                        {
                            QUERY_ERRORS_BY_CATEGORY
                                .with_label_values(&[category.label()])
                                .inc();
                        }
                        debug!(status_code = status, latency_ms, term, "Query completed");
                        QuerySample::new(issued_at, status, latency_ms)
                    }
                    None => {
                        let category = ErrorCategory::MissingLatencyHeader;
                        QUERY_ERRORS_BY_CATEGORY
                            .with_label_values(&[category.label()])
                            .inc();
                        warn!(
                            status_code = status,
                            header = %self.config.latency_header,
                            "Response has no usable latency header, recording failed sample"
                        );
                        QuerySample::failed(issued_at, elapsed_ms(request_start_time))
                    }
                }
            }
            Err(e) => {
                QUERY_STATUS_CODES.with_label_values(&["error"]).inc();

                let error_category = ErrorCategory::from_reqwest_error(&e);
                QUERY_ERRORS_BY_CATEGORY
                    .with_label_values(&[error_category.label()])
                    .inc();

                error!(
                    url = %self.url,
                    error = %e,
                    error_category = %error_category.label(),
                    "Query failed"
                );
                QuerySample::failed(issued_at, elapsed_ms(request_start_time))
            }
        };

        QUERY_LATENCY_SECONDS.observe(sample.latency_ms as f64 / 1000.0);
        CONCURRENT_QUERIES.dec();

        sample
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Reads a millisecond latency from `header`. Integer and non-negative
/// decimal values are accepted; anything else is None.
pub fn parse_latency_header(headers: &HeaderMap, header: &str) -> Option<u64> {
    let raw = headers.get(header)?.to_str().ok()?.trim();
    if let Ok(ms) = raw.parse::<u64>() {
        return Some(ms);
    }
    match raw.parse::<f64>() {
        Ok(ms) if ms.is_finite() && ms >= 0.0 => Some(ms.round() as u64),
        _ => None,
    }
}

/// Returns a static string label for common HTTP status codes.
///
/// Uncommon codes fall back to "other" rather than allocating a unique string.
fn status_code_label(code: u16) -> &'static str {
    match code {
        200 => "200",
        204 => "204",
        206 => "206",
        400 => "400",
        401 => "401",
        403 => "403",
        404 => "404",
        408 => "408",
        429 => "429",
        500 => "500",
        502 => "502",
        503 => "503",
        504 => "504",
        _ => "other",
    }
}

/// Samples of one completed ramp step.
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub samples: Vec<QuerySample>,
    pub started_at: DateTime<Utc>,
    /// Wall-clock time from the first issue to the last completion
    pub elapsed: Duration,
}

/// Runs a whole ramp step and returns only once every issued query finished.
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run_step(&self, step: &RampStep) -> StepOutput;
}

/// Local worker pool: one tokio task per query, paced by a [`RateLimiter`].
pub struct WorkerPool {
    executor: Arc<dyn QueryExecutor>,
}

impl WorkerPool {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl StepRunner for WorkerPool {
    async fn run_step(&self, step: &RampStep) -> StepOutput {
        let planned = step.planned_queries();
        let started_at = Utc::now();
        let start = Instant::now();

        debug!(
            target_rate = step.target_rate,
            duration_secs = step.duration.as_secs_f64(),
            planned,
            "Worker pool starting step"
        );

        let mut limiter = RateLimiter::starting_at(step.target_rate as f64, start);
        let mut tasks = JoinSet::new();
        for _ in 0..planned {
            limiter.acquire().await;
            let executor = Arc::clone(&self.executor);
            tasks.spawn(async move { executor.execute().await });
        }

        debug!(
            issued = limiter.issued(),
            issue_secs = start.elapsed().as_secs_f64(),
            "All queries issued, waiting for completion"
        );

        let mut samples = Vec::with_capacity(planned as usize);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(sample) => samples.push(sample),
                Err(e) => {
                    error!(error = %e, "Query task did not complete, recording failed sample");
                    samples.push(QuerySample::failed(Utc::now(), elapsed_ms(start)));
                }
            }
        }

        StepOutput {
            samples,
            started_at,
            elapsed: start.elapsed(),
        }
    }
}
