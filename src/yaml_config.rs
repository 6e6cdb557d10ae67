//! YAML configuration file support.
//!
//! A sweep can be described in a version-controlled YAML file instead of (or
//! in addition to) environment variables. Every section and field is
//! optional; whatever is missing falls back to the environment and then to
//! the built-in defaults (see [`crate::config::Config::from_yaml_with_env_overrides`]).
//!
//! ```yaml
//! version: "1.0"
//! service:
//!   name: my-search
//!   indexName: papers
//! ramp:
//!   startRate: 10
//!   endRate: 300
//!   increment: 10
//!   stepDuration: "60s"
//! scale:
//!   minReplicas: 1
//!   maxReplicas: 5
//! management:
//!   subscriptionId: 0000-...
//!   resourceGroup: rg-search
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration as StdDuration;
use thiserror::Error;

use crate::config_validation::{DurationValidator, UrlValidator, ValidationContext};

/// Supported configuration format version.
pub const SUPPORTED_VERSION: &str = "1.0";

/// Errors that can occur when loading or parsing YAML configuration.
#[derive(Error, Debug)]
pub enum YamlConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Duration format for YAML (e.g., 60, "30s", "5m", "2h").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum YamlDuration {
    Seconds(u64),
    String(String),
}

impl YamlDuration {
    pub fn to_std_duration(&self) -> Result<StdDuration, YamlConfigError> {
        match self {
            YamlDuration::Seconds(s) => Ok(StdDuration::from_secs(*s)),
            YamlDuration::String(s) => crate::utils::parse_duration_string(s)
                .map_err(|e| YamlConfigError::Validation(format!("Invalid duration '{}': {}", s, e))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct YamlService {
    pub name: Option<String>,
    pub index_name: Option<String>,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub api_version: Option<String>,
    pub query_file: Option<String>,
    /// Extra query string, e.g. `queryType=full&$count=true`
    pub query_params: Option<String>,
    pub latency_header: Option<String>,
    pub success_status_code: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct YamlRamp {
    pub start_rate: Option<u32>,
    pub end_rate: Option<u32>,
    pub increment: Option<u32>,
    pub step_duration: Option<YamlDuration>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct YamlStop {
    pub min_success_ratio: Option<f64>,
    pub max_avg_latency_ms: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct YamlScale {
    pub min_replicas: Option<u32>,
    pub max_replicas: Option<u32>,
    pub partitions: Option<u32>,
    pub poll_interval: Option<YamlDuration>,
    pub settle_delay: Option<YamlDuration>,
    pub max_wait: Option<YamlDuration>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct YamlManagement {
    pub endpoint: Option<String>,
    pub subscription_id: Option<String>,
    pub resource_group: Option<String>,
    pub token: Option<String>,
    pub api_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct YamlClient {
    pub connection_limit: Option<usize>,
    pub timeout: Option<YamlDuration>,
    pub skip_tls_verify: Option<bool>,
    pub resolve_target_addr: Option<String>,
    pub custom_headers: Option<String>,
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct YamlOutput {
    pub results_dir: Option<String>,
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct YamlExecution {
    /// `local`, `distributed` or `node`
    pub mode: Option<String>,
    pub nodes: Vec<String>,
    pub node_code: Option<String>,
    pub queries_per_node: Option<u32>,
    pub listen_addr: Option<String>,
    /// Largest shard (`qps * duration`) accepted in node mode
    pub node_max_queries: Option<u64>,
}

/// Root YAML configuration structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YamlConfig {
    pub version: String,
    pub service: YamlService,
    pub ramp: YamlRamp,
    pub stop: YamlStop,
    pub scale: YamlScale,
    pub management: YamlManagement,
    pub client: YamlClient,
    pub output: YamlOutput,
    pub execution: YamlExecution,
}

impl Default for YamlConfig {
    fn default() -> Self {
        Self {
            version: SUPPORTED_VERSION.to_string(),
            service: YamlService::default(),
            ramp: YamlRamp::default(),
            stop: YamlStop::default(),
            scale: YamlScale::default(),
            management: YamlManagement::default(),
            client: YamlClient::default(),
            output: YamlOutput::default(),
            execution: YamlExecution::default(),
        }
    }
}

impl YamlConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, YamlConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, YamlConfigError> {
        let config: YamlConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the values that can be judged on their own: version, URLs and
    /// duration strings. Cross-field rules run once env overrides are applied.
    fn validate(&self) -> Result<(), YamlConfigError> {
        let mut ctx = ValidationContext::new();

        if self.version.trim() != SUPPORTED_VERSION {
            ctx.add_error(crate::config_validation::ValidationError::FieldError {
                field: "version".to_string(),
                message: format!(
                    "unsupported version '{}', expected '{}'",
                    self.version, SUPPORTED_VERSION
                ),
            });
        }

        ctx.enter("service");
        if let Some(endpoint) = &self.service.endpoint {
            ctx.check(UrlValidator::validate(endpoint, &ctx.path_of("endpoint")));
        }
        ctx.exit();

        ctx.enter("management");
        if let Some(endpoint) = &self.management.endpoint {
            ctx.check(UrlValidator::validate(endpoint, &ctx.path_of("endpoint")));
        }
        ctx.exit();

        let durations = [
            ("ramp.stepDuration", &self.ramp.step_duration),
            ("scale.pollInterval", &self.scale.poll_interval),
            ("scale.settleDelay", &self.scale.settle_delay),
            ("scale.maxWait", &self.scale.max_wait),
            ("client.timeout", &self.client.timeout),
        ];
        for (field, value) in durations {
            if let Some(YamlDuration::String(s)) = value {
                ctx.check(DurationValidator::validate(s, field).map(|_| ()));
            }
        }

        ctx.enter("execution");
        for (idx, node) in self.execution.nodes.iter().enumerate() {
            ctx.check(UrlValidator::validate(
                node,
                &ctx.path_of(&format!("nodes[{}]", idx)),
            ));
        }
        ctx.exit();

        ctx.into_result()
            .map_err(|e| YamlConfigError::Validation(e.to_string()))
    }
}

/// Converts an optional YAML duration, keeping the error attributable.
pub fn optional_duration(
    value: &Option<YamlDuration>,
) -> Result<Option<StdDuration>, YamlConfigError> {
    value.as_ref().map(YamlDuration::to_std_duration).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = YamlConfig::from_str("version: \"1.0\"\n").unwrap();
        assert_eq!(config, YamlConfig::default());
    }

    #[test]
    fn durations_accept_numbers_and_strings() {
        assert_eq!(
            YamlDuration::Seconds(90).to_std_duration().unwrap(),
            StdDuration::from_secs(90)
        );
        assert_eq!(
            YamlDuration::String("2m".to_string())
                .to_std_duration()
                .unwrap(),
            StdDuration::from_secs(120)
        );
        assert!(YamlDuration::String("soon".to_string())
            .to_std_duration()
            .is_err());
    }

    #[test]
    fn rejects_unsupported_version() {
        let err = YamlConfig::from_str("version: \"2.0\"\n").unwrap_err();
        assert!(err.to_string().contains("unsupported version"), "{}", err);
    }

    #[test]
    fn rejects_bad_endpoint_and_duration() {
        let yaml = r#"
version: "1.0"
service:
  endpoint: "svc.search.windows.net"
ramp:
  stepDuration: "1 minute"
"#;
        let err = YamlConfig::from_str(yaml).unwrap_err().to_string();
        assert!(err.contains("service.endpoint"), "{}", err);
        assert!(err.contains("ramp.stepDuration"), "{}", err);
    }
}
