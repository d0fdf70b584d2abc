//! Strata - tiered knowledge consolidation simulator
//!
//! Entry point: loads configuration, builds the world and drives the
//! heartbeat until the tick limit or Ctrl-C.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use strata_core::{Heartbeat, MetricsSnapshot, StrataConfig, World};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Tiered knowledge consolidation for simulated populations", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to the first of the standard locations)
    #[arg(short, long, global = true, env = "STRATA_CONFIG")]
    config: Option<PathBuf>,

    /// Set log level
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the simulation
    Run {
        /// Stop after this many ticks (runs until Ctrl-C otherwise)
        #[arg(long)]
        ticks: Option<u64>,

        /// Override the heartbeat interval (milliseconds)
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Override the RNG seed
        #[arg(long)]
        seed: Option<u64>,

        /// Print the final metrics snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Load and validate the configuration, then exit
    ValidateConfig,

    /// Print the default configuration as TOML
    DefaultConfig,
}

fn load_config(path: Option<&Path>) -> Result<StrataConfig> {
    if let Some(path) = path {
        return StrataConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()));
    }

    for candidate in StrataConfig::default_paths() {
        if candidate.exists() {
            debug!("Using config file {}", candidate.display());
            return StrataConfig::from_file(&candidate)
                .with_context(|| format!("Failed to load config from {}", candidate.display()));
        }
    }

    debug!("No config file found, using defaults");
    Ok(StrataConfig::default())
}

fn print_summary(snapshot: &MetricsSnapshot) {
    println!("tick {}", snapshot.tick);
    println!(
        "  units: {} regular, {} aggregate, {} meta, {} tombstone",
        snapshot.tiers.regular, snapshot.tiers.aggregate, snapshot.tiers.meta_aggregate, snapshot.tiers.tombstone
    );
    println!(
        "  heap: {}/{} resident ({} bytes), {} archived, {} deferred",
        snapshot.in_heap, snapshot.max_in_heap, snapshot.heap_bytes, snapshot.archived, snapshot.backlog
    );
    println!("  population: {} alive, {} dead", snapshot.alive, snapshot.dead);
    println!(
        "  consolidation: {} committed, {} stale, {} failed",
        snapshot.consolidation.committed, snapshot.consolidation.stale, snapshot.consolidation.failed
    );
    println!(
        "  brain: {} calls, {} failures, {} rate limited",
        snapshot.brain.calls, snapshot.brain.failures, snapshot.brain.rate_limited
    );
    println!("  ledger audit failures: {}", snapshot.ledger_violations);
    for task in &snapshot.tasks {
        println!(
            "  task {:<18} runs {:>6}  failures {:>4}  skipped {:>4}",
            task.name, task.runs, task.failures, task.skipped
        );
    }
}

async fn run(
    mut config: StrataConfig,
    ticks: Option<u64>,
    interval_ms: Option<u64>,
    seed: Option<u64>,
    json: bool,
) -> Result<()> {
    if let Some(ms) = interval_ms {
        config.heartbeat.interval = Duration::from_millis(ms);
    }
    if seed.is_some() {
        config.seed = seed;
    }
    config.validate().context("Invalid configuration")?;

    let mut world = World::from_config(config).context("Failed to build world")?;
    let spawned = world.populate(0).context("Failed to spawn initial population")?;
    info!("Spawned {} entities", spawned);

    let mut heartbeat = Heartbeat::with_default_tasks(world);
    let handle = heartbeat.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping after the current tick");
            if let Err(e) = handle.shutdown().await {
                warn!("Shutdown request failed: {}", e);
            }
        }
    });

    let completed = heartbeat.run(ticks).await;
    info!("Completed {} ticks", completed);

    let snapshot = heartbeat.subscribe().borrow().clone();
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_summary(&snapshot);
    }

    if snapshot.ledger_violations > 0 {
        anyhow::bail!("ledger audit failed on {} ticks", snapshot.ledger_violations);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // RUST_LOG wins when set
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "strata={level},strata_core={level},reqwest=warn,hyper=warn",
            level = level.as_str().to_lowercase()
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!("Strata v{} starting...", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run {
            ticks,
            interval_ms,
            seed,
            json,
        } => {
            let config = load_config(cli.config.as_deref())?;
            run(config, ticks, interval_ms, seed, json).await
        }
        Commands::ValidateConfig => {
            load_config(cli.config.as_deref())?;
            println!("Configuration is valid");
            Ok(())
        }
        Commands::DefaultConfig => {
            print!("{}", StrataConfig::default().to_toml()?);
            Ok(())
        }
    }
}
