//! Mundero Duel Simulator
//!
//! Drives the duel engine with synthetic activity: random players challenge
//! each other from the template catalog, counters tick up at random against a
//! virtual clock, and the sweep resolves duels as their windows close. Final
//! standings are printed as JSON.
//!
//! # Quick Start
//!
//! ```bash
//! # Defaults: 6 players, 8 duels, 3 simulated days
//! mundero-duel-sim
//!
//! # Reproducible run with a snapshot of the final store
//! mundero-duel-sim --seed 7 --players 10 --duels 20 --save duels.json
//!
//! # Faster sweep, verbose engine logs
//! MUNDERO__SWEEP_INTERVAL_SECS=1 RUST_LOG=mundero_duels=debug mundero-duel-sim
//! ```

mod simulator;

use std::path::PathBuf;

use clap::Parser;
use mundero_duels::DuelConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::simulator::{SimulationParams, Simulator};

/// Mundero duel simulator
#[derive(Parser, Debug)]
#[command(
    name = "mundero-duel-sim",
    about = "Simulate Mundero 1v1 duels with random activity",
    version
)]
struct Args {
    /// Optional config file (toml or json)
    #[arg(short, long, env = "MUNDERO_CONFIG")]
    config: Option<String>,

    /// Number of simulated players
    #[arg(long, default_value = "6")]
    players: usize,

    /// Number of duels to create
    #[arg(long, default_value = "8")]
    duels: usize,

    /// Simulated hours to run
    #[arg(long, default_value = "72")]
    hours: i64,

    /// Simulated minutes per step
    #[arg(long, default_value = "30")]
    step_minutes: i64,

    /// Chance (percent) that an invitation is accepted
    #[arg(long, default_value = "85")]
    accept_rate: u32,

    /// RNG seed
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Leaderboard rows to print
    #[arg(long, default_value = "10")]
    top: usize,

    /// Write a JSON snapshot of the final store here
    #[arg(long)]
    save: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = DuelConfig::load(args.config.as_deref())?;
    tracing::info!(
        sweep_interval_secs = config.sweep_interval_secs,
        invitation_ttl_hours = config.invitation_ttl_hours,
        "Configuration loaded"
    );

    let params = SimulationParams {
        players: args.players.max(2),
        duels: args.duels,
        hours: args.hours.max(1),
        step_minutes: args.step_minutes.max(1),
        accept_rate: args.accept_rate.min(100),
        seed: args.seed,
        top: args.top,
    };

    let simulator = Simulator::new(config, params);
    let report = simulator.run().await?;

    if let Some(path) = &args.save {
        simulator.store().save_to(path)?;
        tracing::info!(path = %path.display(), "Snapshot written");
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
