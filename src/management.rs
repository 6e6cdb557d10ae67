//! Resource-management API client.
//!
//! Reads and resizes the search service through its ARM-style resource:
//!
//! ```text
//! GET   {endpoint}/subscriptions/{sub}/resourceGroups/{rg}/providers/Microsoft.Search/searchServices/{name}?api-version={v}
//! PATCH (same URL)  {"properties": {"replicaCount": N, "partitionCount": M}}
//! ```
//!
//! A PATCH is accepted asynchronously; the new counts only become visible
//! through later GETs.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ManagementError;
use crate::scale::{ScaleTarget, ServiceManager, ServiceState, ServiceStatus};

/// Where the service resource lives.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagementConfig {
    pub endpoint: String,
    pub subscription_id: String,
    pub resource_group: String,
    pub service_name: String,
    pub api_version: String,
    /// Sent as `Authorization: Bearer ...` when present
    pub bearer_token: Option<String>,
}

impl ManagementConfig {
    pub fn resource_url(&self) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Search/searchServices/{}",
            self.endpoint.trim_end_matches('/'),
            self.subscription_id,
            self.resource_group,
            self.service_name
        )
    }
}

#[derive(Debug, Deserialize)]
struct ServiceResource {
    properties: Option<ServiceProperties>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceProperties {
    status: Option<String>,
    replica_count: Option<u32>,
    partition_count: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ScaleRequest {
    properties: ScaleProperties,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScaleProperties {
    replica_count: u32,
    partition_count: u32,
}

pub struct ArmServiceManager {
    http: Client,
    config: ManagementConfig,
    url: String,
}

impl ArmServiceManager {
    pub fn new(http: Client, config: ManagementConfig) -> Self {
        let url = config.resource_url();
        Self { http, config, url }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.query(&[("api-version", self.config.api_version.as_str())]);
        match &self.config.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ManagementError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(ManagementError::UnexpectedStatus { status, body })
}

/// Convert a resource document into a [`ServiceState`].
fn parse_state(resource: ServiceResource) -> Result<ServiceState, ManagementError> {
    let properties = resource
        .properties
        .ok_or(ManagementError::MissingField("properties"))?;
    let raw_status = properties
        .status
        .ok_or(ManagementError::MissingField("properties.status"))?;
    let status = ServiceStatus::from_api_value(&raw_status)
        .ok_or(ManagementError::UnknownStatus(raw_status))?;

    Ok(ServiceState {
        status,
        replica_count: properties
            .replica_count
            .ok_or(ManagementError::MissingField("properties.replicaCount"))?,
        partition_count: properties
            .partition_count
            .ok_or(ManagementError::MissingField("properties.partitionCount"))?,
    })
}

#[async_trait]
impl ServiceManager for ArmServiceManager {
    async fn get_state(&self) -> Result<ServiceState, ManagementError> {
        let response = self.authorize(self.http.get(&self.url)).send().await?;
        let resource: ServiceResource = check_status(response).await?.json().await?;
        let state = parse_state(resource)?;
        debug!(
            service = %self.config.service_name,
            status = state.status.as_str(),
            replicas = state.replica_count,
            partitions = state.partition_count,
            "Service state"
        );
        Ok(state)
    }

    async fn scale(&self, target: ScaleTarget) -> Result<(), ManagementError> {
        let body = ScaleRequest {
            properties: ScaleProperties {
                replica_count: target.replicas,
                partition_count: target.partitions,
            },
        };
        let response = self
            .authorize(self.http.patch(&self.url))
            .json(&body)
            .send()
            .await?;
        check_status(response).await?;
        info!(
            service = %self.config.service_name,
            replicas = target.replicas,
            partitions = target.partitions,
            "Scale request accepted"
        );
        Ok(())
    }
}
