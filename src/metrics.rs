use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use prometheus::{
    Encoder, Gauge, Histogram, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::env;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

lazy_static::lazy_static! {
    pub static ref METRIC_NAMESPACE: String =
        env::var("METRIC_NAMESPACE").unwrap_or_else(|_| "search_scaletest".to_string());

    // === Query Metrics ===

    pub static ref QUERIES_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("queries_total", "Total number of search queries issued")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref QUERY_STATUS_CODES: IntCounterVec =
        IntCounterVec::new(
            Opts::new("query_status_codes_total", "Number of search queries by status code")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["status_code"]
        ).unwrap();

    pub static ref QUERY_ERRORS_BY_CATEGORY: IntCounterVec =
        IntCounterVec::new(
            Opts::new("query_errors_total", "Number of failed search queries by category")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["category"]
        ).unwrap();

    pub static ref CONCURRENT_QUERIES: Gauge =
        Gauge::with_opts(
            Opts::new("concurrent_queries", "Number of search queries currently in flight")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref QUERY_LATENCY_SECONDS: Histogram =
        Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "query_latency_seconds",
                "Server-reported search latency in seconds."
            ).namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    // === Sweep Metrics ===

    pub static ref TARGET_RATE: IntGauge =
        IntGauge::with_opts(
            Opts::new("target_rate", "Target queries per second of the current ramp step")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref CURRENT_REPLICAS: IntGauge =
        IntGauge::with_opts(
            Opts::new("current_replicas", "Replica count of the configuration under test")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref RAMP_STEPS_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("ramp_steps_total", "Completed ramp steps by outcome")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["outcome"]  // outcome: continue, stopped, no_data
        ).unwrap();

    pub static ref STATUS_POLL_FAILURES: IntCounter =
        IntCounter::with_opts(
            Opts::new("status_poll_failures_total", "Failed management API calls while waiting for the service")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();
}

/// Registers all metrics with the default Prometheus registry.
pub fn register_metrics() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Query metrics
    prometheus::default_registry().register(Box::new(QUERIES_TOTAL.clone()))?;
    prometheus::default_registry().register(Box::new(QUERY_STATUS_CODES.clone()))?;
    prometheus::default_registry().register(Box::new(QUERY_ERRORS_BY_CATEGORY.clone()))?;
    prometheus::default_registry().register(Box::new(CONCURRENT_QUERIES.clone()))?;
    prometheus::default_registry().register(Box::new(QUERY_LATENCY_SECONDS.clone()))?;

    // Sweep metrics
    prometheus::default_registry().register(Box::new(TARGET_RATE.clone()))?;
    prometheus::default_registry().register(Box::new(CURRENT_REPLICAS.clone()))?;
    prometheus::default_registry().register(Box::new(RAMP_STEPS_TOTAL.clone()))?;
    prometheus::default_registry().register(Box::new(STATUS_POLL_FAILURES.clone()))?;

    Ok(())
}

fn encode_metrics(registry: &Arc<Mutex<Registry>>) -> (Vec<u8>, String) {
    let encoder = TextEncoder::new();
    let metric_families = match registry.lock() {
        Ok(registry) => registry.gather(),
        Err(poisoned) => poisoned.into_inner().gather(),
    };
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
    }
    (buffer, encoder.format_type().to_string())
}

/// HTTP handler for the Prometheus metrics endpoint.
pub async fn metrics_handler(
    _req: Request<Body>,
    registry: Arc<Mutex<Registry>>,
) -> Result<Response<Body>, hyper::Error> {
    let (buffer, content_type) = encode_metrics(&registry);

    let mut response = Response::new(Body::from(buffer));
    if let Ok(value) = content_type.parse() {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, value);
    }

    Ok(response)
}

/// Starts the Prometheus metrics HTTP server.
pub async fn start_metrics_server(port: u16, registry: Arc<Mutex<Registry>>) {
    let addr = ([0, 0, 0, 0], port).into();

    let make_svc = make_service_fn(move |_conn| {
        let registry_clone = registry.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let registry_clone_inner = registry_clone.clone();
                async move { metrics_handler(req, registry_clone_inner).await }
            }))
        }
    });

    let server = match Server::try_bind(&addr) {
        Ok(builder) => builder.serve(make_svc),
        Err(e) => {
            error!(port = port, error = %e, "Failed to bind metrics server");
            return;
        }
    };
    info!(
        port = port,
        addr = %addr,
        "Metrics server listening"
    );

    if let Err(e) = server.await {
        error!(error = %e, "Metrics server error");
    }
}

/// Gathers and encodes metrics as a string for final output.
pub fn gather_metrics_string(registry: &Arc<Mutex<Registry>>) -> String {
    let (buffer, _) = encode_metrics(registry);
    String::from_utf8(buffer).unwrap_or_else(|e| {
        eprintln!("Error encoding metrics to UTF-8: {}", e);
        String::from("# ERROR ENCODING METRICS TO UTF-8")
    })
}
