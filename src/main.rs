//! KPI Sentinel - streaming sector KPI anomaly detection
//!
//! # Usage
//!
//! ```bash
//! # Run with the built-in KPI simulator
//! cargo run --release
//!
//! # Pipe batches in as JSON lines
//! kpi-simulator | kpi-sentinel --stdin
//! ```
//!
//! # Environment Variables
//!
//! - `KPI_SENTINEL_CONFIG`: Path to a TOML config file (default: ./kpi_sentinel.toml)
//! - `KPI_SERVER_ADDR`: HTTP bind address (default: 0.0.0.0:8000)
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use kpi_sentinel::api::create_app;
use kpi_sentinel::config::PipelineConfig;
use kpi_sentinel::pipeline::{run_supervisor, Pipeline, TaskName, TaskSet};
use kpi_sentinel::producer::{BatchSource, KpiSimulator, StdinSource};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "kpi-sentinel")]
#[command(about = "Streaming sector KPI anomaly detection with live WebSocket fan-out")]
#[command(version)]
struct CliArgs {
    /// Read batches from stdin (one JSON array per line) instead of the simulator.
    /// Use with: kpi-simulator | kpi-sentinel --stdin
    #[arg(long)]
    stdin: bool,

    /// Override the server address (default: "0.0.0.0:8000")
    #[arg(short, long, env = "KPI_SERVER_ADDR")]
    addr: Option<String>,

    /// Path to a TOML config file (overrides the standard search order)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

/// Spawn the HTTP server task into the supervised set.
fn spawn_http_server(
    task_set: &mut TaskSet,
    listener: tokio::net::TcpListener,
    app: Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;

        let result = match result {
            Ok(()) => {
                info!("[HttpServer] Graceful shutdown complete");
                Ok(())
            }
            Err(e) => {
                error!("[HttpServer] Server error: {}", e);
                Err(anyhow::anyhow!("HTTP server error: {}", e))
            }
        };
        TaskName::HttpServer.exit(result)
    });
}

/// Build the pipeline, bind the server, and supervise until shutdown.
async fn run<S: BatchSource>(
    source: S,
    config: &PipelineConfig,
    server_addr: &str,
    cancel_token: CancellationToken,
) -> Result<()> {
    let pipeline = Pipeline::new(config);
    let app = create_app(pipeline.api_state());

    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", server_addr))?;

    info!("✓ HTTP server listening on {}", server_addr);
    info!("📡 KPI stream: ws://{}/ws/kpi", server_addr);
    info!("");

    info!("🔒 Supervisor: Initializing task monitoring");
    let mut task_set = TaskSet::new();

    spawn_http_server(&mut task_set, listener, app, cancel_token.clone());
    pipeline.spawn(source, &mut task_set, cancel_token.clone());

    run_supervisor(&mut task_set, cancel_token).await
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.json_logs);

    let config = match &args.config {
        Some(path) => PipelineConfig::load_from_file(path)
            .with_context(|| format!("Invalid config file {}", path.display()))?,
        None => PipelineConfig::load(),
    };
    let server_addr = args.addr.clone().unwrap_or_else(|| config.server.addr.clone());

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  KPI Sentinel - Streaming Sector KPI Anomaly Detection");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("");
    info!(
        "🧠 Model: isolation forest ({} trees, contamination {})",
        config.model.n_estimators, config.model.contamination
    );
    info!(
        "   Warm-up: {} samples | Window: {} | Retrain every {}s",
        config.scorer.warmup_samples, config.scorer.window_capacity, config.scorer.retrain_interval_secs
    );
    info!("");

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    if args.stdin {
        info!("📥 Input: stdin (JSON batches, one per line)");
        run(StdinSource::stdin(), &config, &server_addr, cancel_token).await?;
    } else {
        info!(
            "📥 Input: simulator ({} sectors every {}ms)",
            config.simulator.sectors, config.simulator.interval_ms
        );
        run(KpiSimulator::new(&config.simulator), &config, &server_addr, cancel_token).await?;
    }

    info!("");
    info!("✓ KPI Sentinel shutdown complete");
    Ok(())
}
