//! GiNOD Run - Simulates a two-player merge scenario
//!
//! This binary loads a scenario, runs the receding-horizon loop, and
//! writes the resulting trace as JSON.

use clap::Parser;
use ginod::scenario::ScenarioConfig;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ginod-run")]
#[command(about = "Run a game-induced opinion dynamics scenario")]
struct Cli {
    /// Path to a scenario TOML file (omit for the built-in merge)
    scenario: Option<PathBuf>,

    /// Override the number of simulation steps
    #[arg(long)]
    steps: Option<usize>,

    /// Where to write the JSON trace
    #[arg(long, default_value = "trace.json")]
    output: PathBuf,
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ginod=info,ginod_run=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.scenario {
        Some(path) => {
            info!("Loading scenario from: {}", path.display());
            match ScenarioConfig::load(path) {
                Ok(c) => c,
                Err(e) => {
                    error!("Failed to load scenario: {}", e);
                    std::process::exit(1);
                }
            }
        }
        None => {
            info!("Using the built-in merge scenario");
            ScenarioConfig::default_merge()
        }
    };
    if let Some(steps) = cli.steps {
        config.simulation.steps = steps;
    }

    let (planner, x0, z0) = match config.build() {
        Ok(built) => built,
        Err(e) => {
            error!("Failed to build scenario: {}", e);
            std::process::exit(1);
        }
    };

    info!("Running {} steps...", planner.n_steps());
    let trace = match planner.plan(&x0, &z0) {
        Ok(t) => t,
        Err(e) => {
            error!("Planning failed: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = trace.write_json(&cli.output) {
        error!("Failed to write trace: {}", e);
        std::process::exit(1);
    }
    info!("Trace written to: {}", cli.output.display());
}
