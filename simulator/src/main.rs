//! Strongbox Simulator
//!
//! Drives the ledger engine through concurrent scenarios and checks that
//! balances stay conserved and non-negative.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod controller;
mod metrics;
mod scenario;

use controller::SimulationController;
use scenario::Scenario;
use strongbox_ledger::{LedgerConfig, LedgerEngine, LockOrdering};

/// Strongbox Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Strongbox load and scenario harness")]
struct Args {
    /// Built-in scenario name or path to a JSON scenario
    #[arg(short, long, default_value = "single-transfer")]
    scenario: String,

    /// Number of accounts for random-load
    #[arg(short, long, default_value = "10")]
    accounts: usize,

    /// Maximum operations in flight
    #[arg(short, long, default_value = "16")]
    concurrency: usize,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Transfer lock ordering (canonical or request-order)
    #[arg(long)]
    lock_ordering: Option<LockOrdering>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = LedgerConfig::from_env();
    if let Some(ordering) = args.lock_ordering {
        config.lock_ordering = ordering;
    }

    init_logging(&config.log_level, args.json_logs);

    info!(
        backend = %config.store.backend,
        lock_ordering = %config.lock_ordering,
        concurrency = args.concurrency,
        "Starting Strongbox Simulator"
    );

    let engine = Arc::new(LedgerEngine::from_config(&config).await?);
    let scenario = Scenario::load(&args.scenario, args.accounts)?;

    let mut controller = SimulationController::new(engine, args.concurrency, args.seed);

    let started = Instant::now();
    let outcome = controller.run_scenario(&scenario).await;
    let elapsed = started.elapsed();

    let metrics = controller.metrics().await;
    info!("Simulation complete");
    info!("Total operations: {}", metrics.total_operations);
    info!("Successful: {}", metrics.successful_operations);
    info!("Failed: {}", metrics.failed_operations);
    for (code, count) in &metrics.failures_by_code {
        info!("  {}: {}", code, count);
    }
    info!(
        "Latency: avg {}us, p50 {}us, p99 {}us",
        metrics.average_latency_us(),
        metrics.p50_latency_us(),
        metrics.p99_latency_us()
    );
    info!(
        "Success rate: {:.1}%, throughput: {:.0} ops/s",
        metrics.success_rate() * 100.0,
        metrics.throughput(elapsed)
    );

    if let Err(e) = &outcome {
        warn!("Scenario {} failed: {:#}", scenario.name, e);
    }

    outcome
}
