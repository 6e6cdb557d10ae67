use chrono::Utc;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use search_scaletest::client::build_client;
use search_scaletest::config::{print_config_help, Config, RunMode};
use search_scaletest::data_source::QuerySource;
use search_scaletest::management::ArmServiceManager;
use search_scaletest::metrics::{gather_metrics_string, register_metrics, start_metrics_server};
use search_scaletest::node::serve_node;
use search_scaletest::ramp::{RampController, RampState};
use search_scaletest::remote::RemoteNodeRunner;
use search_scaletest::scale::{ScaleController, SweepReport};
use search_scaletest::sink::{log_file_name, CsvResultSink};
use search_scaletest::worker::{SearchQueryExecutor, StepRunner, WorkerPool};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Initializes tracing; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let result = if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .try_init()
    };
    if let Err(e) = result {
        eprintln!("Tracing subscriber already initialized: {}", e);
    }
}

fn local_pool(client: reqwest::Client, config: &Config) -> Result<WorkerPool, BoxError> {
    let queries = QuerySource::from_file(&config.search.query_file).map_err(|e| {
        format!(
            "Failed to load query terms from '{}': {}",
            config.search.query_file.display(),
            e
        )
    })?;
    info!(
        terms = queries.len(),
        file = %config.search.query_file.display(),
        "Query terms loaded"
    );
    let executor = SearchQueryExecutor::new(client, config.to_query_config(), queries);
    Ok(WorkerPool::new(Arc::new(executor)))
}

async fn run_sweep<R: StepRunner>(config: &Config, runner: R) -> Result<SweepReport, BoxError> {
    let log_path = config.results_dir.join(log_file_name(
        &config.search.service_name,
        config.scale.min_replicas,
        config.scale.partitions,
        Utc::now(),
    ));
    let mut sink = CsvResultSink::create(&log_path)?;

    let ramp = RampController::new(
        runner,
        config.ramp.clone(),
        config.thresholds,
        config.search.success_status,
        config.search.service_name.clone(),
    );
    let manager = ArmServiceManager::new(reqwest::Client::builder().build()?, config.management.clone());
    let controller = ScaleController::new(manager, ramp, config.scale.clone(), config.poll.clone());

    let report = controller.run(&mut sink).await?;
    info!(path = %sink.path().display(), "Results written");
    Ok(report)
}

fn print_sweep_report(report: &SweepReport) {
    println!("\n--- SWEEP SUMMARY ---");
    for outcome in &report.outcomes {
        let max_rate = outcome
            .max_rate_run()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".to_string());
        match &outcome.final_state {
            RampState::Stopped { rate, reason } => println!(
                "  {} replicas / {} partitions: stopped at {} QPS ({}), highest rate run {}",
                outcome.target.replicas, outcome.target.partitions, rate, reason, max_rate
            ),
            state => println!(
                "  {} replicas / {} partitions: {}, highest rate run {}",
                outcome.target.replicas,
                outcome.target.partitions,
                state.label(),
                max_rate
            ),
        }
    }
    println!("--- END OF SWEEP SUMMARY ---\n");
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    init_tracing();

    // Register Prometheus metrics
    register_metrics()?;

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}\n", e);
            print_config_help();
            std::process::exit(1);
        }
    };

    let client_result = build_client(&config.to_client_config())?;
    let client = client_result.client;
    config.print_summary(&client_result.default_headers);

    let registry_arc = Arc::new(Mutex::new(prometheus::default_registry().clone()));
    {
        let registry = registry_arc.clone();
        let metrics_port = config.metrics_port;
        tokio::spawn(async move {
            start_metrics_server(metrics_port, registry).await;
        });
    }

    let report = match config.run_mode {
        RunMode::Node => {
            let pool = local_pool(client, &config)?;
            let listener = TcpListener::bind(&config.node_listen_addr).map_err(|e| {
                format!("Failed to bind NODE_LISTEN_ADDR '{}': {}", config.node_listen_addr, e)
            })?;
            let settings = config.to_node_settings();
            if let Err(e) = serve_node(listener, Arc::new(pool), settings).await {
                error!(error = %e, "Test node server failed");
                return Err(e.into());
            }
            return Ok(());
        }
        RunMode::Local => run_sweep(&config, local_pool(client, &config)?).await,
        RunMode::Distributed => {
            run_sweep(&config, RemoteNodeRunner::new(client, config.remote.clone())).await
        }
    };

    let report = match report {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Sweep aborted");
            return Err(e);
        }
    };

    print_sweep_report(&report);

    let final_metrics_output = gather_metrics_string(&registry_arc);
    println!("\n--- FINAL METRICS ---\n{}", final_metrics_output);
    println!("--- END OF FINAL METRICS ---\n");

    Ok(())
}
