//! Pledge server and maintenance CLI.
//!
//!   pledge serve                  - HTTP API plus background sweeper
//!   pledge sweep                  - one sweeper pass, report on stdout
//!   pledge distribute <community> - settle one ended community

mod logging;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use pledge_database::basic_db::{InnerDatabase, SafeDatabase};
use pledge_net::server::{build_server, spawn_sweeper};
use pledge_net::state::AppState;
use pledge_service::config::PledgeConfig;
use pledge_service::distribution::DistributionEngine;
use pledge_service::sweeper::Sweeper;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "pledge", version, about = "Stake-backed accountability communities")]
struct Cli {
    /// Path to pledge.toml; a missing file means defaults
    #[arg(short, long, env = "PLEDGE_CONFIG", default_value = "pledge.toml")]
    config: PathBuf,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API (default)
    Serve,
    /// Run one sweeper pass and exit
    Sweep,
    /// Settle one ended community and exit
    Distribute { community_id: String },
}

fn open_state(config: PledgeConfig) -> anyhow::Result<AppState<InnerDatabase>> {
    std::fs::create_dir_all(&config.storage.path)
        .with_context(|| format!("cannot create storage directory {}", config.storage.path))?;
    let database = InnerDatabase::new(&config.storage.path)
        .with_context(|| format!("cannot open ledger store at {}", config.storage.path))?;
    Ok(AppState::new(database, config))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = PledgeConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    logging::init_logging(&config.logging, cli.verbose)?;
    info!(config = %cli.config.display(), storage = %config.storage.path, "Starting pledge");

    let state = open_state(config)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let interval = state.config.server.sweep_interval_secs;
            if interval > 0 {
                spawn_sweeper(state.clone(), Duration::from_secs(interval));
                info!(interval_secs = interval, "Background sweeper started");
            }
            build_server(state).await?;
        }
        Command::Sweep => {
            let report = tokio::task::spawn_blocking(move || {
                Sweeper::new(&state.store, &state.config.engine, state.criteria.as_ref()).run_once(Utc::now())
            })
            .await??;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Distribute { community_id } => {
            let outcome = tokio::task::spawn_blocking(move || {
                DistributionEngine::new(&state.store, &state.config.engine, state.criteria.as_ref())
                    .distribute(&community_id, Utc::now())
            })
            .await??;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
    }

    Ok(())
}
