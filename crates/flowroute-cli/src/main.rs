mod scenario;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use flowroute_core::FlowrouteConfig;
use tracing::info;

use crate::scenario::{Scenario, Simulation};

#[derive(Debug, Parser)]
#[command(name = "flowroute", version, about = "Redirectable flow registry tooling")]
struct Cli {
    /// TOML configuration file. Missing files fall back to defaults.
    #[arg(long, global = true, env = "FLOWROUTE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the effective configuration as TOML
    Config,
    /// Run a JSON scenario against an in-memory ledger and print the outcome
    Simulate {
        /// Scenario file
        scenario: PathBuf,
        /// Single-line JSON instead of pretty output
        #[arg(long, default_value_t = false)]
        compact: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<FlowrouteConfig> {
    let config = match path {
        Some(path) => FlowrouteConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => FlowrouteConfig::default(),
    };
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "flowroute=info,info".to_string()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Config => {
            print!("{}", config.to_toml_string()?);
        }
        Command::Simulate { scenario, compact } => {
            let raw = std::fs::read_to_string(&scenario)
                .with_context(|| format!("reading scenario {}", scenario.display()))?;
            let parsed: Scenario = serde_json::from_str(&raw)
                .with_context(|| format!("parsing scenario {}", scenario.display()))?;
            info!(path = %scenario.display(), steps = parsed.steps.len(), "Running scenario");

            let report = Simulation::run(config, parsed)?;
            let output = if compact {
                serde_json::to_string(&report)?
            } else {
                serde_json::to_string_pretty(&report)?
            };
            println!("{}", output);
        }
    }

    Ok(())
}
