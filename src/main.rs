// =============================================================================
// indigo-rl: offline inspection tools for the Pokémon Yellow environment core
// =============================================================================
//   cargo run --release -- decode --dump wram.bin
//   cargo run --release -- reward-trace --dump a.bin --dump b.bin --dump c.bin

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};

use indigo_rl::observation::{self, MemoryVector};
use indigo_rl::reward;
use indigo_rl::{GameState, RamDump, RewardBreakdown, RewardConfig, RewardEvent};

#[derive(Serialize)]
struct DecodeReport<'a> {
    dump: &'a Path,
    state: GameState,
    memory_vector: MemoryVector,
}

#[derive(Serialize)]
struct TraceLine<'a> {
    step: usize,
    dump: &'a Path,
    reward: f64,
    breakdown: RewardBreakdown,
    events: &'a [RewardEvent],
}

fn load_reward_config(path: Option<&Path>) -> Result<RewardConfig> {
    match path {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open reward config: {}", path.display()))?;
            serde_json::from_reader(file)
                .with_context(|| format!("Invalid reward config: {}", path.display()))
        }
        None => Ok(RewardConfig::default()),
    }
}

fn decode(args: &DecodeArgs) -> Result<()> {
    let dump = RamDump::load(&args.dump)?;
    let state = GameState::read(&dump);
    let report = DecodeReport {
        dump: &args.dump,
        state,
        memory_vector: observation::memory_vector(&state),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn reward_trace(args: &RewardTraceArgs) -> Result<()> {
    let reward_config = load_reward_config(args.config.as_deref())?;
    let (first, rest) = args
        .dump
        .split_first()
        .context("reward-trace needs at least one dump")?;

    let spawn = GameState::read(&RamDump::load(first)?);
    tracing::info!(dump = %first.display(), map_id = spawn.map_id, "seeded reward state");
    let states = rest
        .iter()
        .map(|path| RamDump::load(path).map(|dump| GameState::read(&dump)))
        .collect::<Result<Vec<_>>>()?;

    let (steps, tracker) = reward::trace(&spawn, &states, &reward_config);
    for (i, (path, step)) in rest.iter().zip(&steps).enumerate() {
        let line = TraceLine {
            step: i + 1,
            dump: path,
            reward: step.total(),
            breakdown: step.breakdown,
            events: &step.events,
        };
        println!("{}", serde_json::to_string(&line)?);
    }

    let total: f64 = steps.iter().map(|s| s.total()).sum();
    eprintln!(
        "transitions={} total_reward={total:.3} maps={} coords={}",
        steps.len(),
        tracker.visited_maps().len(),
        tracker.visited_coords().len()
    );
    Ok(())
}

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser)]
#[command(name = "indigo-rl", about = "Pokémon Yellow RL environment: RAM inspection")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a RAM dump into the game state and observation vector
    Decode(DecodeArgs),
    /// Replay a sequence of RAM dumps through the reward state machine
    RewardTrace(RewardTraceArgs),
}

#[derive(Parser)]
struct DecodeArgs {
    #[arg(long)]
    dump: PathBuf,
}

#[derive(Parser)]
struct RewardTraceArgs {
    /// Dumps in play order; the first one seeds the episode
    #[arg(long, required = true)]
    dump: Vec<PathBuf>,
    /// JSON file overriding the default reward weights
    #[arg(long)]
    config: Option<PathBuf>,
}

// =============================================================================
// Main
// =============================================================================

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Commands::Decode(args) => decode(args),
        Commands::RewardTrace(args) => reward_trace(args),
    }
}
