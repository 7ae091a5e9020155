//! rota command-line driver
//!
//! Thin CLI over the run lifecycle: create and drive a run from an input
//! file, resume after a crash, inspect status, and list runs. Ctrl-C
//! cancels the active run cooperatively; the loop writes a terminal
//! cancelled state before exiting.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rota::autonomous::{RunManager, RunRequest, RunStore};
use rota::config::Config;
use rota::engine::MoonlightingHours;
use rota::generator::GeneratorInputs;

#[derive(Parser)]
#[command(name = "rota", about = "Autonomous duty-schedule controller", version)]
struct Cli {
    /// Path to a TOML config file; environment variables otherwise
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create and drive a run to a terminal status
    Run {
        /// Scenario tag for the run directory
        #[arg(long, default_value = "baseline")]
        scenario: String,

        /// Schedule period start (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,

        /// Schedule period end (YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,

        /// JSON file with persons, blocks, templates, and absences
        #[arg(long)]
        input: PathBuf,

        /// Target score overriding the configured default
        #[arg(long)]
        target: Option<f64>,

        /// Iteration cap overriding the configured default
        #[arg(long)]
        max_iterations: Option<u32>,

        /// RNG seed overriding the configured default
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Resume a crashed or interrupted run
    Resume {
        run_id: String,

        /// JSON file with persons, blocks, templates, and absences
        #[arg(long)]
        input: PathBuf,
    },

    /// Show the persisted state of a run
    Status { run_id: String },

    /// List runs, optionally filtered by scenario prefix
    List {
        #[arg(long)]
        scenario: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env(),
    };

    init_logging(&config);
    if let Err(e) = rota::metrics::init_metrics() {
        tracing::warn!(error = %e, "metrics unavailable, continuing without them");
    }

    let store = Arc::new(RunStore::new(&config.runs.base_path)?);
    let manager = Arc::new(RunManager::new(Arc::clone(&store)));

    match cli.command {
        Command::Run {
            scenario,
            start,
            end,
            input,
            target,
            max_iterations,
            seed,
        } => {
            let inputs = load_inputs(&input)?;
            let request = RunRequest::new(scenario, start, end)
                .with_target(target.unwrap_or(config.runs.target_score))
                .with_limits(
                    max_iterations.unwrap_or(config.runs.max_iterations),
                    config.runs.stagnation_limit,
                )
                .with_seed(seed.unwrap_or(config.runs.rng_seed));

            let state = manager.create(&request)?;
            println!("run created: {}", state.run_id);

            rota::metrics::record_run_started();
            manager.start(&state.run_id, inputs, MoonlightingHours::new())?;

            let run_id = state.run_id.clone();
            tokio::spawn({
                let manager = Arc::clone(&manager);
                let run_id = run_id.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::warn!(run_id = %run_id, "interrupt received, cancelling run");
                        manager.cancel(&run_id);
                    }
                }
            });

            let finished = tokio::task::spawn_blocking({
                let manager = Arc::clone(&manager);
                let store = Arc::clone(&store);
                move || {
                    manager.join(&run_id);
                    store.load_run(&run_id)
                }
            })
            .await
            .context("run worker panicked")??;

            if let Some(state) = finished {
                rota::metrics::record_run_finished(state.status.as_str());
                println!(
                    "run {}: {} (best {:.4} at iteration {})",
                    state.run_id,
                    state.status.as_str(),
                    state.best_score,
                    state.best_iteration,
                );
            }
        }

        Command::Resume { run_id, input } => {
            let inputs = load_inputs(&input)?;
            manager.resume(&run_id, inputs, MoonlightingHours::new())?;
            println!("run resumed: {run_id}");
            tokio::task::spawn_blocking(move || manager.join(&run_id))
                .await
                .context("run worker panicked")?;
        }

        Command::Status { run_id } => match manager.summary(&run_id)? {
            Some(summary) => println!("{}", serde_json::to_string_pretty(&summary)?),
            None => println!("run not found: {run_id}"),
        },

        Command::List { scenario } => {
            for run_id in manager.list(scenario.as_deref())? {
                println!("{run_id}");
            }
        }
    }

    Ok(())
}

fn load_inputs(path: &PathBuf) -> Result<GeneratorInputs> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read input file: {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse input file: {}", path.display()))
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
