//! KPI Simulator - prints synthetic sector KPI batches as JSON lines
//!
//! Each line is one batch (a JSON array of samples), suitable for piping
//! into `kpi-sentinel --stdin`.
//!
//! Usage:
//!   kpi-simulator [--sectors N] [--interval-ms MS] [--seed S] [--count N]

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use tracing::info;

use kpi_sentinel::config::{PipelineConfig, SimulatorConfig};
use kpi_sentinel::producer::KpiSimulator;

#[derive(Parser, Debug)]
#[command(name = "kpi-simulator")]
#[command(about = "Emit synthetic sector KPI batches as JSON lines")]
#[command(version)]
struct Args {
    /// Number of sectors per batch (default from config)
    #[arg(long)]
    sectors: Option<usize>,

    /// Milliseconds between batches (default from config)
    #[arg(long)]
    interval_ms: Option<u64>,

    /// RNG seed for reproducible output
    #[arg(long)]
    seed: Option<u64>,

    /// Stop after this many batches (default: run forever)
    #[arg(long)]
    count: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays pure JSON
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = Args::parse();
    let base = PipelineConfig::load().simulator;
    let config = SimulatorConfig {
        sectors: args.sectors.unwrap_or(base.sectors),
        interval_ms: args.interval_ms.unwrap_or(base.interval_ms),
        seed: args.seed.or(base.seed),
    };

    let mut simulator = KpiSimulator::new(&config);
    info!(
        sectors = simulator.sector_count(),
        interval_ms = config.interval_ms,
        "Simulator started"
    );

    let mut emitted = 0u64;
    loop {
        if args.count.is_some_and(|n| emitted >= n) {
            break;
        }
        if emitted > 0 && !config.interval().is_zero() {
            tokio::time::sleep(config.interval()).await;
        }

        let line = serde_json::to_string(&simulator.generate_batch()).context("Failed to encode batch")?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", line)
            .and_then(|()| stdout.flush())
            .context("stdout closed")?;
        emitted += 1;
    }

    info!(batches = emitted, "Simulator finished");
    Ok(())
}
