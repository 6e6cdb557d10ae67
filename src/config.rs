use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::time::Duration;

use crate::client::ClientConfig;
use crate::config_validation::{
    DurationValidator, RampValidator, RangeValidator, ReplicaValidator, UrlValidator,
    ValidationContext, ValidationError,
};
use crate::connection_pool::{PoolConfig, DEFAULT_CONNECTION_LIMIT};
use crate::load_models::RampSchedule;
use crate::management::ManagementConfig;
use crate::node::{NodeSettings, DEFAULT_MAX_SHARD_QUERIES};
use crate::ramp::StopThresholds;
use crate::remote::RemoteNodeConfig;
use crate::scale::{PollSettings, ScalePlan};
use crate::utils::{parse_duration_string, parse_list, parse_query_params};
use crate::worker::SearchQueryConfig;
use crate::yaml_config::{optional_duration, YamlConfig};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// How this process takes part in a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Sweep with queries issued from this process
    Local,
    /// Sweep with steps fanned out to remote test nodes
    Distributed,
    /// Serve step requests from a controller
    Node,
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(RunMode::Local),
            "distributed" => Ok(RunMode::Distributed),
            "node" => Ok(RunMode::Node),
            other => Err(format!(
                "Unknown RUN_MODE '{}'. Expected local, distributed or node.",
                other
            )),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunMode::Local => "local",
            RunMode::Distributed => "distributed",
            RunMode::Node => "node",
        };
        write!(f, "{}", name)
    }
}

/// Search service and query settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSettings {
    pub service_name: String,
    pub index_name: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub api_version: String,
    pub query_file: PathBuf,
    pub extra_params: Vec<(String, String)>,
    pub latency_header: String,
    pub success_status: u16,
}

/// HTTP client settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub connection_limit: usize,
    pub request_timeout: Option<Duration>,
    pub skip_tls_verify: bool,
    pub resolve_target_addr: Option<String>,
    pub custom_headers: Option<String>,
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
}

/// Main configuration for a sweep or a test node.
#[derive(Debug, Clone)]
pub struct Config {
    pub search: SearchSettings,
    pub ramp: RampSchedule,
    pub thresholds: StopThresholds,
    pub scale: ScalePlan,
    pub poll: PollSettings,
    pub management: ManagementConfig,
    pub client: ClientSettings,
    pub results_dir: PathBuf,
    pub metrics_port: u16,
    pub run_mode: RunMode,
    pub remote: RemoteNodeConfig,
    pub node_listen_addr: String,
    /// Largest shard (`qps * duration`) a test node accepts
    pub node_max_queries: u64,
}

/// Non-empty value of an environment variable.
fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(name: &str) -> Result<Option<T>, BoxError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env_string(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid {} '{}': {}", name, raw, e).into()),
        None => Ok(None),
    }
}

fn env_duration(name: &str) -> Result<Option<Duration>, BoxError> {
    match env_string(name) {
        Some(raw) => parse_duration_string(&raw)
            .map(Some)
            .map_err(|e| format!("Invalid {} format: '{}'. {}", name, raw, e).into()),
        None => Ok(None),
    }
}

fn env_bool(name: &str) -> Option<bool> {
    env_string(name).map(|v| v.trim().eq_ignore_ascii_case("true"))
}

impl Config {
    /// Loads configuration from environment variables, layered over the YAML
    /// file named by `CONFIG_FILE` when set.
    pub fn from_env() -> Result<Self, BoxError> {
        let yaml = match env_string("CONFIG_FILE") {
            Some(path) => YamlConfig::from_file(&path)
                .map_err(|e| format!("Failed to load CONFIG_FILE '{}': {}", path, e))?,
            None => YamlConfig::default(),
        };
        Self::from_yaml_with_env_overrides(&yaml)
    }

    /// Builds the configuration with precedence env > yaml > defaults, then
    /// validates it.
    pub fn from_yaml_with_env_overrides(yaml: &YamlConfig) -> Result<Self, BoxError> {
        let service = &yaml.service;
        let service_name = env_string("SEARCH_SERVICE_NAME")
            .or_else(|| service.name.clone())
            .unwrap_or_default();
        let endpoint = env_string("SEARCH_ENDPOINT")
            .or_else(|| service.endpoint.clone())
            .unwrap_or_else(|| format!("https://{}.search.windows.net", service_name));
        let extra_params = env_string("QUERY_EXTRA_PARAMS")
            .or_else(|| service.query_params.clone())
            .unwrap_or_else(|| "queryType=full&$count=true".to_string());

        let search = SearchSettings {
            index_name: env_string("SEARCH_INDEX_NAME")
                .or_else(|| service.index_name.clone())
                .unwrap_or_default(),
            endpoint,
            api_key: env_string("SEARCH_API_KEY").or_else(|| service.api_key.clone()),
            api_version: env_string("SEARCH_API_VERSION")
                .or_else(|| service.api_version.clone())
                .unwrap_or_else(|| "2020-06-30".to_string()),
            query_file: env_string("QUERY_FILE")
                .or_else(|| service.query_file.clone())
                .unwrap_or_else(|| "queries.txt".to_string())
                .into(),
            extra_params: parse_query_params(&extra_params),
            latency_header: env_string("LATENCY_HEADER")
                .or_else(|| service.latency_header.clone())
                .unwrap_or_else(|| "elapsed-time".to_string()),
            success_status: env_parse("SUCCESS_STATUS_CODE")?
                .or(service.success_status_code)
                .unwrap_or(200),
            service_name: service_name.clone(),
        };

        let ramp_defaults = RampSchedule::default();
        let ramp = RampSchedule {
            start_rate: env_parse("START_RATE")?
                .or(yaml.ramp.start_rate)
                .unwrap_or(ramp_defaults.start_rate),
            end_rate: env_parse("END_RATE")?
                .or(yaml.ramp.end_rate)
                .unwrap_or(ramp_defaults.end_rate),
            increment: env_parse("RATE_INCREMENT")?
                .or(yaml.ramp.increment)
                .unwrap_or(ramp_defaults.increment),
            step_duration: match env_duration("STEP_DURATION")? {
                Some(d) => d,
                None => optional_duration(&yaml.ramp.step_duration)?
                    .unwrap_or(ramp_defaults.step_duration),
            },
        };

        let stop_defaults = StopThresholds::default();
        let thresholds = StopThresholds {
            min_success_ratio: env_parse("MIN_SUCCESS_RATIO")?
                .or(yaml.stop.min_success_ratio)
                .unwrap_or(stop_defaults.min_success_ratio),
            max_avg_latency_ms: env_parse("MAX_AVG_LATENCY_MS")?
                .or(yaml.stop.max_avg_latency_ms)
                .unwrap_or(stop_defaults.max_avg_latency_ms),
        };

        let plan_defaults = ScalePlan::default();
        let scale = ScalePlan {
            min_replicas: env_parse("MIN_REPLICAS")?
                .or(yaml.scale.min_replicas)
                .unwrap_or(plan_defaults.min_replicas),
            max_replicas: env_parse("MAX_REPLICAS")?
                .or(yaml.scale.max_replicas)
                .unwrap_or(plan_defaults.max_replicas),
            partitions: env_parse("PARTITIONS")?
                .or(yaml.scale.partitions)
                .unwrap_or(plan_defaults.partitions),
        };

        let poll_defaults = PollSettings::default();
        let poll = PollSettings {
            interval: match env_duration("STATUS_POLL_INTERVAL")? {
                Some(d) => d,
                None => optional_duration(&yaml.scale.poll_interval)?
                    .unwrap_or(poll_defaults.interval),
            },
            settle_delay: match env_duration("SCALE_SETTLE_DELAY")? {
                Some(d) => d,
                None => optional_duration(&yaml.scale.settle_delay)?
                    .unwrap_or(poll_defaults.settle_delay),
            },
            max_wait: match env_duration("STATUS_MAX_WAIT")? {
                Some(d) => Some(d),
                None => optional_duration(&yaml.scale.max_wait)?,
            },
        };

        let mgmt = &yaml.management;
        let management = ManagementConfig {
            endpoint: env_string("MANAGEMENT_ENDPOINT")
                .or_else(|| mgmt.endpoint.clone())
                .unwrap_or_else(|| "https://management.azure.com".to_string()),
            subscription_id: env_string("SUBSCRIPTION_ID")
                .or_else(|| mgmt.subscription_id.clone())
                .unwrap_or_default(),
            resource_group: env_string("RESOURCE_GROUP")
                .or_else(|| mgmt.resource_group.clone())
                .unwrap_or_default(),
            service_name,
            api_version: env_string("MANAGEMENT_API_VERSION")
                .or_else(|| mgmt.api_version.clone())
                .unwrap_or_else(|| "2020-08-01".to_string()),
            bearer_token: env_string("MANAGEMENT_TOKEN").or_else(|| mgmt.token.clone()),
        };

        let yc = &yaml.client;
        let client = ClientSettings {
            connection_limit: env_parse("CONNECTION_LIMIT")?
                .or(yc.connection_limit)
                .unwrap_or(DEFAULT_CONNECTION_LIMIT),
            request_timeout: match env_duration("REQUEST_TIMEOUT")? {
                Some(d) => Some(d),
                None => optional_duration(&yc.timeout)?,
            },
            skip_tls_verify: env_bool("SKIP_TLS_VERIFY")
                .or(yc.skip_tls_verify)
                .unwrap_or(false),
            resolve_target_addr: env_string("RESOLVE_TARGET_ADDR")
                .or_else(|| yc.resolve_target_addr.clone()),
            custom_headers: env_string("CUSTOM_HEADERS").or_else(|| yc.custom_headers.clone()),
            client_cert_path: env_string("CLIENT_CERT_PATH")
                .or_else(|| yc.client_cert_path.clone()),
            client_key_path: env_string("CLIENT_KEY_PATH").or_else(|| yc.client_key_path.clone()),
        };

        let exec = &yaml.execution;
        let run_mode = match env_string("RUN_MODE").or_else(|| exec.mode.clone()) {
            Some(mode) => mode.parse::<RunMode>()?,
            None => RunMode::Local,
        };
        let mut remote = RemoteNodeConfig::new(match env_string("TEST_NODES") {
            Some(nodes) => parse_list(&nodes),
            None => exec.nodes.clone(),
        });
        remote.code = env_string("TEST_NODE_CODE").or_else(|| exec.node_code.clone());
        if let Some(per_node) = env_parse("QUERIES_PER_NODE")?.or(exec.queries_per_node) {
            remote.queries_per_node = per_node;
        }

        let config = Config {
            search,
            ramp,
            thresholds,
            scale,
            poll,
            management,
            client,
            results_dir: env_string("RESULTS_DIR")
                .or_else(|| yaml.output.results_dir.clone())
                .unwrap_or_else(|| "logs".to_string())
                .into(),
            metrics_port: env_parse("METRICS_PORT")?
                .or(yaml.output.metrics_port)
                .unwrap_or(9090),
            run_mode,
            remote,
            node_listen_addr: env_string("NODE_LISTEN_ADDR")
                .or_else(|| exec.listen_addr.clone())
                .unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            node_max_queries: env_parse("NODE_MAX_QUERIES")?
                .or(exec.node_max_queries)
                .unwrap_or(DEFAULT_MAX_SHARD_QUERIES),
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field rules, collecting every violation.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut ctx = ValidationContext::new();

        ctx.enter("service");
        ctx.require_non_empty("name", &self.search.service_name);
        ctx.require_non_empty("indexName", &self.search.index_name);
        ctx.check(UrlValidator::validate(
            &self.search.endpoint,
            &ctx.path_of("endpoint"),
        ));
        ctx.require_non_empty("latencyHeader", &self.search.latency_header);
        ctx.exit();

        ctx.check(RampValidator::validate(
            self.ramp.start_rate,
            self.ramp.end_rate,
            self.ramp.increment,
        ));
        if self.ramp.step_duration.is_zero() {
            ctx.check(DurationValidator::validate_positive("0s", "ramp.stepDuration"));
        }

        ctx.check(RangeValidator::validate_f64(
            self.thresholds.min_success_ratio,
            0.0,
            1.0,
            "stop.minSuccessRatio",
        ));
        ctx.check(RangeValidator::validate_positive_f64(
            self.thresholds.max_avg_latency_ms,
            "stop.maxAvgLatencyMs",
        ));

        match self.run_mode {
            RunMode::Node => {
                ctx.enter("execution");
                let field = ctx.path_of("nodeCode");
                if self.remote.code.as_deref().map_or(true, |c| c.trim().is_empty()) {
                    ctx.add_error(ValidationError::RequiredField { field });
                }
                ctx.check(RangeValidator::validate_positive_u64(
                    self.node_max_queries,
                    &ctx.path_of("nodeMaxQueries"),
                ));
                ctx.exit();
            }
            RunMode::Local | RunMode::Distributed => {
                ctx.check(ReplicaValidator::validate(
                    self.scale.min_replicas,
                    self.scale.max_replicas,
                    self.scale.partitions,
                ));
                if self.poll.interval.is_zero() {
                    ctx.check(DurationValidator::validate_positive(
                        "0s",
                        "scale.pollInterval",
                    ));
                }

                ctx.enter("management");
                ctx.check(UrlValidator::validate(
                    &self.management.endpoint,
                    &ctx.path_of("endpoint"),
                ));
                ctx.require_non_empty("subscriptionId", &self.management.subscription_id);
                ctx.require_non_empty("resourceGroup", &self.management.resource_group);
                ctx.exit();
            }
        }

        ctx.check(RangeValidator::validate_positive_u64(
            self.client.connection_limit as u64,
            "client.connectionLimit",
        ));

        if self.run_mode == RunMode::Distributed {
            ctx.enter("execution");
            if self.remote.nodes.is_empty() {
                let field = ctx.path_of("nodes");
                ctx.add_error(ValidationError::FieldError {
                    field,
                    message: "distributed mode needs at least one test node".to_string(),
                });
            }
            for (idx, node) in self.remote.nodes.iter().enumerate() {
                ctx.check(UrlValidator::validate(
                    node,
                    &ctx.path_of(&format!("nodes[{}]", idx)),
                ));
            }
            ctx.check(RangeValidator::validate_positive_u64(
                self.remote.queries_per_node as u64,
                "execution.queriesPerNode",
            ));
            ctx.exit();
        }

        ctx.into_result()
    }

    /// Creates a ClientConfig from this Config.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            api_key: self.search.api_key.clone(),
            skip_tls_verify: self.client.skip_tls_verify,
            resolve_target_addr: self.client.resolve_target_addr.clone(),
            client_cert_path: self.client.client_cert_path.clone(),
            client_key_path: self.client.client_key_path.clone(),
            custom_headers: self.client.custom_headers.clone(),
            pool_config: PoolConfig::default().with_connection_limit(self.client.connection_limit),
            request_timeout: self.client.request_timeout,
        }
    }

    /// Access and size limits for node mode.
    pub fn to_node_settings(&self) -> NodeSettings {
        NodeSettings {
            code: self.remote.code.clone().unwrap_or_default(),
            max_queries: self.node_max_queries,
        }
    }

    pub fn to_query_config(&self) -> SearchQueryConfig {
        SearchQueryConfig {
            endpoint: self.search.endpoint.clone(),
            index_name: self.search.index_name.clone(),
            api_version: self.search.api_version.clone(),
            extra_params: self.search.extra_params.clone(),
            latency_header: self.search.latency_header.clone(),
            success_status: self.search.success_status,
        }
    }

    /// Prints the configuration summary.
    pub fn print_summary(&self, default_headers: &reqwest::header::HeaderMap) {
        println!("Starting search scale test ({} mode):", self.run_mode);
        println!("  Service: {}", self.search.service_name);
        println!("  Index: {}", self.search.index_name);
        println!("  Query endpoint: {}", self.search.endpoint);
        println!("  Query file: {}", self.search.query_file.display());
        println!(
            "  Ramp: {} -> {} QPS, +{} per step, {:?} per step",
            self.ramp.start_rate, self.ramp.end_rate, self.ramp.increment, self.ramp.step_duration
        );
        println!(
            "  Stop when success < {:.2}% or avg latency > {}ms",
            self.thresholds.min_success_ratio * 100.0,
            self.thresholds.max_avg_latency_ms
        );
        println!(
            "  Replicas: {} -> {} with {} partition(s)",
            self.scale.min_replicas, self.scale.max_replicas, self.scale.partitions
        );
        match self.poll.max_wait {
            Some(max_wait) => println!(
                "  Status poll: every {:?}, give up after {:?}",
                self.poll.interval, max_wait
            ),
            None => println!("  Status poll: every {:?}, no limit", self.poll.interval),
        }
        println!("  Connection limit: {}", self.client.connection_limit);
        println!("  Results directory: {}", self.results_dir.display());
        if self.run_mode == RunMode::Distributed {
            println!(
                "  Test nodes: {} ({} QPS per shard)",
                self.remote.nodes.join(", "),
                self.remote.queries_per_node
            );
        }

        if self.client.client_cert_path.is_some() && self.client.client_key_path.is_some() {
            println!("  mTLS Enabled: Yes");
        }
        if !default_headers.is_empty() {
            println!("  Default Headers:");
            for (name, value) in default_headers.iter() {
                let shown = if value.is_sensitive() {
                    "<redacted>"
                } else {
                    value.to_str().unwrap_or("<non-ASCII value>")
                };
                println!("    {}: {}", name, shown);
            }
        }
    }
}

/// Prints helpful configuration documentation.
pub fn print_config_help() {
    eprintln!("Required environment variables (or CONFIG_FILE=<yaml>):");
    eprintln!("  SEARCH_SERVICE_NAME     - Name of the search service under test");
    eprintln!("  SEARCH_INDEX_NAME       - Index to query");
    eprintln!("  SUBSCRIPTION_ID         - Subscription holding the service (not needed in node mode)");
    eprintln!("  RESOURCE_GROUP          - Resource group holding the service (not needed in node mode)");
    eprintln!();
    eprintln!("Search:");
    eprintln!("  SEARCH_ENDPOINT         - Query endpoint (default: https://<service>.search.windows.net)");
    eprintln!("  SEARCH_API_KEY          - Sent as the api-key header");
    eprintln!("  SEARCH_API_VERSION      - Query API version (default: 2020-06-30)");
    eprintln!("  QUERY_FILE              - One search term per line (default: queries.txt)");
    eprintln!("  QUERY_EXTRA_PARAMS      - Extra query string (default: queryType=full&$count=true)");
    eprintln!("  LATENCY_HEADER          - Server latency header (default: elapsed-time)");
    eprintln!("  SUCCESS_STATUS_CODE     - Status counted as success (default: 200)");
    eprintln!();
    eprintln!("Ramp and stop conditions:");
    eprintln!("  START_RATE / END_RATE   - Query rate range in QPS (default: 10 / 300)");
    eprintln!("  RATE_INCREMENT          - QPS added per step (default: 10)");
    eprintln!("  STEP_DURATION           - Duration of each step: 30s, 10m (default: 60s)");
    eprintln!("  MIN_SUCCESS_RATIO       - Stop below this success ratio (default: 0.97)");
    eprintln!("  MAX_AVG_LATENCY_MS      - Stop above this average latency (default: 1000)");
    eprintln!();
    eprintln!("Scaling:");
    eprintln!("  MIN_REPLICAS / MAX_REPLICAS - Replica range to sweep (default: 1 / 5)");
    eprintln!("  PARTITIONS              - Partition count (default: 1)");
    eprintln!("  STATUS_POLL_INTERVAL    - Poll interval while waiting (default: 15s)");
    eprintln!("  SCALE_SETTLE_DELAY      - Pause after a scale request (default: 2s)");
    eprintln!("  STATUS_MAX_WAIT         - Give up waiting after this long (default: never)");
    eprintln!("  MANAGEMENT_ENDPOINT     - Management API root (default: https://management.azure.com)");
    eprintln!("  MANAGEMENT_TOKEN        - Bearer token for the management API");
    eprintln!("  MANAGEMENT_API_VERSION  - Management API version (default: 2020-08-01)");
    eprintln!();
    eprintln!("Client:");
    eprintln!("  CONNECTION_LIMIT        - Pooled connections per host (default: 25)");
    eprintln!("  REQUEST_TIMEOUT         - Per-request timeout (default: none)");
    eprintln!("  SKIP_TLS_VERIFY         - Skip TLS certificate verification (default: false)");
    eprintln!("  CLIENT_CERT_PATH / CLIENT_KEY_PATH - mTLS identity, both required together");
    eprintln!("  RESOLVE_TARGET_ADDR     - DNS override: hostname:ip:port");
    eprintln!("  CUSTOM_HEADERS          - Comma-separated headers (use \\, for literal commas)");
    eprintln!();
    eprintln!("Execution and output:");
    eprintln!("  RUN_MODE                - local, distributed or node (default: local)");
    eprintln!("  TEST_NODES              - Comma-separated test node URLs (distributed mode)");
    eprintln!("  TEST_NODE_CODE          - Access code sent to test nodes (required in node mode)");
    eprintln!("  QUERIES_PER_NODE        - QPS per dispatched shard (default: 10)");
    eprintln!("  NODE_LISTEN_ADDR        - Listen address in node mode (default: 0.0.0.0:8080)");
    eprintln!("  NODE_MAX_QUERIES        - Largest shard a node accepts, qps * duration (default: 36000)");
    eprintln!("  RESULTS_DIR             - Directory for the CSV results log (default: logs)");
    eprintln!("  METRICS_PORT            - Prometheus metrics port (default: 9090)");
    eprintln!("  LOG_FORMAT              - json or text (default: text)");
    eprintln!("  METRIC_NAMESPACE        - Prometheus metric namespace (default: search_scaletest)");
}
