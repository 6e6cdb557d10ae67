//! Integration tests for the resource-management client.

use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::time::Duration;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use search_scaletest::errors::{ManagementError, RampError};
use search_scaletest::management::{ArmServiceManager, ManagementConfig};
use search_scaletest::ramp::{RampOutcome, RampRunner, RampState};
use search_scaletest::scale::{
    PollSettings, ScaleController, ScalePlan, ScaleTarget, ServiceManager, ServiceStatus,
};
use search_scaletest::sink::{MemorySink, ResultSink};

const RESOURCE_PATH: &str =
    "/subscriptions/sub-1/resourceGroups/rg-search/providers/Microsoft.Search/searchServices/svc";

fn manager(server: &MockServer, token: Option<&str>) -> ArmServiceManager {
    ArmServiceManager::new(
        reqwest::Client::new(),
        ManagementConfig {
            endpoint: server.uri(),
            subscription_id: "sub-1".to_string(),
            resource_group: "rg-search".to_string(),
            service_name: "svc".to_string(),
            api_version: "2020-08-01".to_string(),
            bearer_token: token.map(String::from),
        },
    )
}

fn resource(status: &str, replicas: u32, partitions: u32) -> serde_json::Value {
    json!({
        "name": "svc",
        "sku": {"name": "standard"},
        "properties": {
            "status": status,
            "provisioningState": "succeeded",
            "replicaCount": replicas,
            "partitionCount": partitions
        }
    })
}

#[tokio::test]
async fn reads_service_state() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(RESOURCE_PATH))
        .and(query_param("api-version", "2020-08-01"))
        .and(header("authorization", "Bearer token-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(resource("running", 3, 1)))
        .expect(3)
        .mount(&server)
        .await;

    let manager = manager(&server, Some("token-123"));
    let state = manager.get_state().await.unwrap();

    assert_eq!(state.status, ServiceStatus::Running);
    assert_eq!(state.replica_count, 3);
    assert_eq!(state.partition_count, 1);
    assert_eq!(manager.status().await.unwrap(), ServiceStatus::Running);
    assert_eq!(manager.replica_count().await.unwrap(), 3);

    println!("✅ Service state read from the management API");
}

#[tokio::test]
async fn scale_sends_patch_with_counts() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path(RESOURCE_PATH))
        .and(query_param("api-version", "2020-08-01"))
        .and(body_json(json!({
            "properties": {"replicaCount": 4, "partitionCount": 2}
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    manager(&server, None)
        .scale(ScaleTarget::new(4, 2))
        .await
        .unwrap();

    println!("✅ Scale request submitted");
}

#[tokio::test]
async fn error_status_is_reported() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(RESOURCE_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
        .mount(&server)
        .await;

    let err = manager(&server, None).get_state().await.unwrap_err();

    assert!(matches!(
        err,
        ManagementError::UnexpectedStatus { status: 500, ref body } if body == "internal"
    ));

    println!("✅ Non-2xx responses become errors");
}

#[tokio::test]
async fn unknown_status_is_a_polling_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(RESOURCE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(resource("deleting", 1, 1)))
        .mount(&server)
        .await;

    let err = manager(&server, None).get_state().await.unwrap_err();

    assert!(matches!(err, ManagementError::UnknownStatus(ref s) if s == "deleting"));

    println!("✅ Unknown status strings are rejected");
}

struct RecordingRamp {
    targets: Arc<Mutex<Vec<ScaleTarget>>>,
}

#[async_trait]
impl RampRunner for RecordingRamp {
    async fn run_ramp(
        &self,
        target: ScaleTarget,
        _sink: &mut dyn ResultSink,
    ) -> Result<RampOutcome, RampError> {
        self.targets.lock().unwrap().push(target);
        Ok(RampOutcome {
            target,
            final_state: RampState::Completed,
            results: Vec::new(),
        })
    }
}

#[tokio::test]
async fn sweep_scales_through_management_api() {
    let server = MockServer::start().await;

    // First poll sees the old size, later polls see the new one.
    Mock::given(method("GET"))
        .and(path(RESOURCE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(resource("running", 1, 1)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(RESOURCE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(resource("running", 2, 1)))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(RESOURCE_PATH))
        .and(body_json(json!({
            "properties": {"replicaCount": 2, "partitionCount": 1}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(resource("provisioning", 2, 1)))
        .expect(1)
        .mount(&server)
        .await;

    let targets = Arc::new(Mutex::new(Vec::new()));
    let controller = ScaleController::new(
        manager(&server, None),
        RecordingRamp {
            targets: Arc::clone(&targets),
        },
        ScalePlan {
            min_replicas: 2,
            max_replicas: 2,
            partitions: 1,
        },
        PollSettings {
            interval: Duration::from_millis(5),
            settle_delay: Duration::from_millis(5),
            max_wait: Some(Duration::from_secs(5)),
        },
    );
    let mut sink = MemorySink::default();

    let report = controller.run(&mut sink).await.unwrap();

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(
        *targets.lock().unwrap(),
        vec![ScaleTarget::new(2, 1)]
    );

    println!("✅ Sweep resized the service before ramping");
}
