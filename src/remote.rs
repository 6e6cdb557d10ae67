//! Distributed step execution.
//!
//! A step's target rate is split into shards of at most `queries_per_node`
//! QPS. Each shard is dispatched to a remote test node (round-robin over the
//! configured nodes), which runs it locally and answers with its samples:
//!
//! ```text
//! GET {node}/api/searchtestnode?qps=10&duration=60&code=...
//! -> [{"runStatusCode":200,"runMS":35,"runTime":"2024-01-31T15:30:00Z"}, ...]
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info};

use crate::load_models::RampStep;
use crate::worker::{QuerySample, StepOutput, StepRunner};

pub const NODE_PATH: &str = "/api/searchtestnode";

/// Sample as exchanged with test nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireSample {
    #[serde(rename = "runStatusCode")]
    pub status_code: u16,
    #[serde(rename = "runMS")]
    pub latency_ms: i64,
    #[serde(rename = "runTime")]
    pub issued_at: DateTime<Utc>,
}

impl From<QuerySample> for WireSample {
    fn from(sample: QuerySample) -> Self {
        Self {
            status_code: sample.status_code,
            latency_ms: sample.latency_ms as i64,
            issued_at: sample.issued_at,
        }
    }
}

impl From<WireSample> for QuerySample {
    /// A negative latency cannot be a measurement, so it becomes a failed sample.
    fn from(wire: WireSample) -> Self {
        if wire.latency_ms < 0 {
            return QuerySample::failed(wire.issued_at, 0);
        }
        QuerySample::new(wire.issued_at, wire.status_code, wire.latency_ms as u64)
    }
}

#[derive(Error, Debug)]
pub enum RemoteNodeError {
    #[error("test node request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("test node returned HTTP {0}")]
    UnexpectedStatus(u16),
}

/// Split `rate` into shards of at most `per_node` QPS, e.g. 25/10 -> [10, 10, 5].
pub fn shard_rates(rate: u32, per_node: u32) -> Vec<u32> {
    if rate == 0 {
        return Vec::new();
    }
    let per_node = per_node.max(1);
    let mut shards = vec![per_node; (rate / per_node) as usize];
    if rate % per_node > 0 {
        shards.push(rate % per_node);
    }
    shards
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteNodeConfig {
    /// Base URLs of the test nodes
    pub nodes: Vec<String>,
    /// Access code forwarded as the `code` query parameter
    pub code: Option<String>,
    pub queries_per_node: u32,
    /// Pause between shard dispatches
    pub dispatch_spacing: Duration,
}

impl RemoteNodeConfig {
    pub fn new(nodes: Vec<String>) -> Self {
        Self {
            nodes,
            code: None,
            queries_per_node: 10,
            dispatch_spacing: Duration::from_millis(50),
        }
    }
}

/// Runs steps by fanning shards out to remote test nodes.
pub struct RemoteNodeRunner {
    client: Client,
    config: RemoteNodeConfig,
}

impl RemoteNodeRunner {
    pub fn new(client: Client, config: RemoteNodeConfig) -> Self {
        Self { client, config }
    }

    fn node_for(&self, shard: usize) -> &str {
        let node = &self.config.nodes[shard % self.config.nodes.len()];
        node.trim_end_matches('/')
    }
}

async fn dispatch_shard(
    client: Client,
    url: String,
    code: Option<String>,
    qps: u32,
    duration_secs: u64,
) -> Result<Vec<WireSample>, RemoteNodeError> {
    let mut request = client.get(&url).query(&[
        ("qps", qps.to_string()),
        ("duration", duration_secs.to_string()),
    ]);
    if let Some(code) = code {
        request = request.query(&[("code", code)]);
    }

    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(RemoteNodeError::UnexpectedStatus(response.status().as_u16()));
    }
    Ok(response.json::<Vec<WireSample>>().await?)
}

#[async_trait]
impl StepRunner for RemoteNodeRunner {
    async fn run_step(&self, step: &RampStep) -> StepOutput {
        let started_at = Utc::now();
        let start = Instant::now();
        // Nodes take whole seconds; a lost shard is counted from the same value.
        let duration_secs = step.duration.as_secs();
        let shard_duration = Duration::from_secs(duration_secs);
        let shards = shard_rates(step.target_rate, self.config.queries_per_node);

        if self.config.nodes.is_empty() {
            error!("No test nodes configured, step produces no samples");
            return StepOutput {
                samples: Vec::new(),
                started_at,
                elapsed: start.elapsed(),
            };
        }

        info!(
            target_rate = step.target_rate,
            shards = shards.len(),
            nodes = self.config.nodes.len(),
            "Dispatching step to test nodes"
        );

        let mut pending: Vec<(u32, String, JoinHandle<Result<Vec<WireSample>, RemoteNodeError>>)> =
            Vec::with_capacity(shards.len());
        for (i, qps) in shards.into_iter().enumerate() {
            let url = format!("{}{}", self.node_for(i), NODE_PATH);
            debug!(shard = i, qps, url = %url, "Dispatching shard");
            let handle = tokio::spawn(dispatch_shard(
                self.client.clone(),
                url.clone(),
                self.config.code.clone(),
                qps,
                duration_secs,
            ));
            pending.push((qps, url, handle));
            sleep(self.config.dispatch_spacing).await;
        }

        let mut samples = Vec::new();
        for (qps, url, handle) in pending {
            let outcome = match handle.await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match outcome {
                Ok(shard_samples) => {
                    debug!(url = %url, count = shard_samples.len(), "Shard returned");
                    samples.extend(shard_samples.into_iter().map(QuerySample::from));
                }
                Err(e) => {
                    let lost = RampStep::new(qps, shard_duration).planned_queries();
                    error!(
                        url = %url,
                        qps,
                        lost_queries = lost,
                        error = %e,
                        "Shard failed, counting its queries as failed"
                    );
                    let failed_at = Utc::now();
                    let waited = start.elapsed().as_millis() as u64;
                    samples.extend((0..lost).map(|_| QuerySample::failed(failed_at, waited)));
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
