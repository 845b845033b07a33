mod config;
mod http;
mod metrics;
mod state;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::{BackendArgs, BackendKind};
use firewatch_core::backend::DocumentBackend;
use firewatch_core::memory::MemoryBackend;
use firewatch_core::recorder::Recorder;
use firewatch_core::replayer::Replayer;
use firewatch_core::store::FireReportStore;
use firewatch_core::types::ReplayMode;
use firewatch_ws::WsBackend;
use http::router;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use state::{spawn_event_observer, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "firewatch")]
#[command(about = "Live fire-incident dashboard backend with notifications and report workflow")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror the incident collection and serve the dashboard API
    Serve {
        /// Document backend to mirror
        #[arg(long, value_enum, default_value = "memory")]
        backend: BackendKind,
        /// HTTP server address
        #[arg(long, default_value = "127.0.0.1:8080")]
        http: String,
        /// Recording file path (optional)
        #[arg(long)]
        record: Option<PathBuf>,
        #[command(flatten)]
        config: BackendArgs,
    },
    /// Replay a recording into an in-process backend
    Replay {
        /// Input recording file
        #[arg(long)]
        input: PathBuf,
        /// Replay speed multiplier (0 replays as fast as possible)
        #[arg(long, default_value = "1.0")]
        speed: f64,
        /// HTTP server address
        #[arg(long, default_value = "127.0.0.1:8080")]
        http: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus metrics recorder")?;

    match cli.command {
        Commands::Serve {
            backend,
            http,
            record,
            config,
        } => {
            config.validate(backend)?;
            config.log_effective(backend);
            match backend {
                BackendKind::Memory => {
                    let backend = Arc::new(MemoryBackend::new());
                    run_store(backend, "memory", &config.collection, http, record, metrics_handle).await?;
                }
                BackendKind::Gateway => {
                    let backend = Arc::new(WsBackend::spawn(config.to_gateway_config()?));
                    run_store(backend, "gateway", &config.collection, http, record, metrics_handle).await?;
                }
            }
        }
        Commands::Replay { input, speed, http } => {
            replay_recording(input, speed, http, metrics_handle).await?;
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run_store<B: DocumentBackend>(
    backend: Arc<B>,
    backend_kind: &'static str,
    collection: &str,
    http_addr: String,
    record_path: Option<PathBuf>,
    metrics_handle: PrometheusHandle,
) -> anyhow::Result<()> {
    info!("Starting firewatch");

    let mut store = FireReportStore::new(backend, collection);
    if let Some(path) = record_path {
        info!("Recording change batches to {:?}", path);
        store = store.with_recorder(Recorder::new(path)?);
    }

    let state = AppState::new(store.clone(), backend_kind, Some(metrics_handle));
    let observer = spawn_event_observer(state.clone());

    let handle = store
        .subscribe()
        .await
        .with_context(|| format!("Failed to subscribe to {}", collection))?;
    state.set_subscription(handle).await;

    let result = serve_http(state.clone(), http_addr).await;

    if let Some(handle) = state.take_subscription().await {
        handle.unsubscribe().await;
    }
    observer.abort();
    result
}

async fn replay_recording(
    input: PathBuf,
    speed: f64,
    http_addr: String,
    metrics_handle: PrometheusHandle,
) -> anyhow::Result<()> {
    info!("Replaying recording from {:?} at {}x speed", input, speed);

    let mut replayer = Replayer::open(&input, ReplayMode::from_speed(speed))?;
    info!("Loaded {} recorded batches", replayer.len());

    let backend = Arc::new(MemoryBackend::new());
    let store = FireReportStore::new(Arc::clone(&backend), firewatch_core::types::FIRE_REPORTS);
    let state = AppState::new(store.clone(), "replay", Some(metrics_handle));
    let observer = spawn_event_observer(state.clone());

    let handle = store.subscribe().await.context("Failed to subscribe to replay backend")?;
    state.set_subscription(handle).await;

    // Recorded batches land in the store's collection whatever they were recorded under.
    let collection = store.collection().to_string();
    let feeder = tokio::spawn(async move {
        replayer.start();
        while !replayer.is_done() {
            match replayer.next_batch() {
                Some(recorded) => backend.push_batch(&collection, recorded.batch),
                None => sleep(Duration::from_millis(10)).await,
            }
        }
        info!("Replay completed");
    });

    let result = serve_http(state.clone(), http_addr).await;

    feeder.abort();
    if let Some(handle) = state.take_subscription().await {
        handle.unsubscribe().await;
    }
    observer.abort();
    result
}

async fn serve_http<B: DocumentBackend>(state: AppState<B>, http_addr: String) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("Failed to bind HTTP listener on {}", http_addr))?;
    info!("HTTP server listening on http://{}", http_addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;
    warn!("HTTP server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
