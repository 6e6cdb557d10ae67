//! Test node mode.
//!
//! Serves `GET /api/searchtestnode?qps=N&duration=S&code=C`: the node runs one
//! paced step of `N` queries per second for `S` seconds against the search
//! service and answers with every sample as a JSON array of [`WireSample`]s.
//! The controller fans shards out to such nodes in distributed mode.
//!
//! Requests without the access code get 401, a wrong code gets 403. A shard
//! asking for more than [`NodeSettings::max_queries`] queries is rejected
//! with 400 before anything runs.

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{error, info, warn};

use crate::load_models::RampStep;
use crate::remote::{WireSample, NODE_PATH};
use crate::utils::parse_query_params;
use crate::worker::StepRunner;

/// Queries a single shard may ask for unless configured otherwise: 10 QPS for
/// an hour.
pub const DEFAULT_MAX_SHARD_QUERIES: u64 = 36_000;

/// Access and size limits enforced by a test node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSettings {
    /// Access code every request must carry as `code`. An empty code admits
    /// nobody.
    pub code: String,
    /// Upper bound on `qps * duration` for one shard
    pub max_queries: u64,
}

impl NodeSettings {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            max_queries: DEFAULT_MAX_SHARD_QUERIES,
        }
    }
}

/// Percent-decoded query parameters of a node request.
fn request_params(query: Option<&str>) -> Vec<(String, String)> {
    let query = query.unwrap_or("");
    match reqwest::Url::parse("http://node.invalid/") {
        Ok(mut url) => {
            url.set_query(Some(query));
            url.query_pairs()
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect()
        }
        Err(_) => parse_query_params(query),
    }
}

fn param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Checks the `code` parameter: 401 when absent, 403 when it does not match.
pub fn check_access(query: Option<&str>, expected: &str) -> Result<(), StatusCode> {
    let params = request_params(query);
    match param(&params, "code") {
        None => Err(StatusCode::UNAUTHORIZED),
        Some(code) if expected.is_empty() || code != expected => Err(StatusCode::FORBIDDEN),
        Some(_) => Ok(()),
    }
}

/// Reads `qps` and `duration` (seconds) from a request query string.
pub fn parse_step_params(query: Option<&str>) -> Result<RampStep, String> {
    let params = request_params(query);
    let lookup = |name: &str| param(&params, name);

    let qps = lookup("qps")
        .ok_or("missing 'qps' parameter")?
        .parse::<u32>()
        .map_err(|_| "'qps' must be a non-negative integer".to_string())?;
    let duration = lookup("duration")
        .ok_or("missing 'duration' parameter")?
        .parse::<u64>()
        .map_err(|_| "'duration' must be a whole number of seconds".to_string())?;

    if qps == 0 || duration == 0 {
        return Err("'qps' and 'duration' must be greater than zero".to_string());
    }
    Ok(RampStep::new(qps, Duration::from_secs(duration)))
}

fn text_response(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
}

async fn node_handler(
    req: Request<Body>,
    runner: Arc<dyn StepRunner>,
    settings: Arc<NodeSettings>,
) -> Result<Response<Body>, hyper::Error> {
    if req.method() != Method::GET || req.uri().path() != NODE_PATH {
        return Ok(text_response(StatusCode::NOT_FOUND, "not found"));
    }

    if let Err(status) = check_access(req.uri().query(), &settings.code) {
        warn!(status = status.as_u16(), "Rejected test node request without a valid code");
        return Ok(text_response(status, "invalid or missing code"));
    }

    // The query string carries the code, so it is not logged below.
    let step = match parse_step_params(req.uri().query()) {
        Ok(step) => step,
        Err(message) => {
            warn!(error = %message, "Rejected test node request");
            return Ok(text_response(StatusCode::BAD_REQUEST, message));
        }
    };
    if step.planned_queries() > settings.max_queries {
        let message = format!(
            "shard of {} queries exceeds the node limit of {}",
            step.planned_queries(),
            settings.max_queries
        );
        warn!(
            qps = step.target_rate,
            duration_secs = step.duration.as_secs(),
            max_queries = settings.max_queries,
            "Rejected oversized test node shard"
        );
        return Ok(text_response(StatusCode::BAD_REQUEST, message));
    }

    info!(
        qps = step.target_rate,
        duration_secs = step.duration.as_secs(),
        "Running test node shard"
    );
    let output = runner.run_step(&step).await;
    let samples: Vec<WireSample> = output.samples.into_iter().map(WireSample::from).collect();
    info!(
        samples = samples.len(),
        elapsed_secs = output.elapsed.as_secs_f64(),
        "Test node shard finished"
    );

    match serde_json::to_vec(&samples) {
        Ok(body) => {
            let mut response = Response::new(Body::from(body));
            if let Ok(value) = "application/json".parse() {
                response
                    .headers_mut()
                    .insert(hyper::header::CONTENT_TYPE, value);
            }
            Ok(response)
        }
        Err(e) => {
            error!(error = %e, "Failed to encode samples");
            Ok(text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to encode samples",
            ))
        }
    }
}

/// Serves test node requests on an already-bound listener until the server
/// fails.
pub async fn serve_node(
    listener: TcpListener,
    runner: Arc<dyn StepRunner>,
    settings: NodeSettings,
) -> Result<(), hyper::Error> {
    let addr: Option<SocketAddr> = listener.local_addr().ok();
    let max_queries = settings.max_queries;
    let settings = Arc::new(settings);

    let make_svc = make_service_fn(move |_conn| {
        let runner = Arc::clone(&runner);
        let settings = Arc::clone(&settings);
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let runner_inner = Arc::clone(&runner);
                let settings_inner = Arc::clone(&settings);
                async move { node_handler(req, runner_inner, settings_inner).await }
            }))
        }
    });

    let server = Server::from_tcp(listener)?.serve(make_svc);
    info!(addr = ?addr, path = NODE_PATH, max_queries, "Test node listening");
    server.await
}
