use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use core_logic::{setup_logger, setup_quiet_logger};
use dotenv::dotenv;
use roulette_keeper::bets::queue_sizes;
use roulette_keeper::config::KeeperConfig;
use roulette_keeper::Keeper;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const DEFAULT_CONFIG: &str = "config/config.toml";
const WORKSPACE_CONFIG: &str = "chains/roulette-keeper/config/config.toml";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: String,

    /// Errors only on the console, no log file
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive the round lifecycle until Ctrl+C (default)
    Run,
    /// Print the decoded round state and endpoint health
    Status,
    /// Run the claim process once for a round
    Claim {
        #[arg(short, long)]
        round: Option<u64>,
    },
    /// Print the bet queue size per group without submitting
    Plan,
    /// Create the player-bets account of every identity that lacks one
    InitPlayers,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenv().ok();

    let args = Args::parse();

    // Auto-detect config path when run from the workspace root
    let config_path = if Path::new(&args.config).exists() {
        args.config.clone()
    } else if args.config == DEFAULT_CONFIG && Path::new(WORKSPACE_CONFIG).exists() {
        WORKSPACE_CONFIG.to_string()
    } else {
        args.config.clone()
    };

    let config = KeeperConfig::load(&config_path).context("Failed to load config")?;

    let _log_guard = if args.quiet {
        setup_quiet_logger();
        None
    } else {
        setup_logger(&config.log_dir)
    };

    let keeper = Keeper::build(config)?;

    match args.command.unwrap_or(Commands::Run) {
        Commands::Run => run(keeper).await,
        Commands::Status => status(&keeper).await,
        Commands::Claim { round } => claim(&keeper, round).await,
        Commands::Plan => plan(&keeper),
        Commands::InitPlayers => init_players(&keeper).await,
    }
}

async fn run(keeper: Keeper) -> Result<()> {
    println!(
        r#"
        ╔════════════════════════════════════════════════════════════╗
        ║                 ROULETTE KEEPER - LIVE LOG                 ║
        ╚════════════════════════════════════════════════════════════╝
        "#
    );
    info!(target: "round", "Game session: {}", keeper.config.game_session_address);
    info!(target: "round", "Tracked identities: {}", keeper.reconciler.identities().len());

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!(target: "round", "Ctrl+C received, shutting down..."),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
        token.cancel();
    });

    keeper.controller().run(shutdown).await;

    info!(target: "round", "Bets {}", keeper.bet_metrics.to_compact_json());
    Ok(())
}

async fn status(keeper: &Keeper) -> Result<()> {
    let state = keeper
        .source
        .fetch()
        .await
        .context("Failed to read round state")?;

    println!("Round:                {}", state.current_round);
    println!("Status:               {}", state.status);
    println!("Start time:           {}", state.round_start_time);
    match state.winning_number {
        Some(n) => println!("Winning number:       {}", n),
        None => println!("Winning number:       -"),
    }
    println!("Bets closed at:       {}", state.bets_closed_timestamp);
    println!("Randomness at:        {}", state.get_random_timestamp);
    println!("Last completed round: {}", state.last_completed_round);
    println!("Authority:            {}", hex::encode(state.authority));

    println!("\nEndpoints:");
    for health in keeper.pool.health_status() {
        println!(
            "  {} {} (failures: {}{})",
            if health.active { "*" } else { " " },
            health.url,
            health.failure_count,
            if health.healthy { "" } else { ", unhealthy" }
        );
    }
    Ok(())
}

async fn claim(keeper: &Keeper, round: Option<u64>) -> Result<()> {
    let report = match round {
        Some(round) => Some(keeper.reconciler.reconcile(round).await?),
        None => keeper.reconciler.reconcile_latest(keeper.source.as_ref()).await?,
    };

    match report {
        Some(report) => info!(
            target: "claims",
            "Round #{}: checked {} | candidates {} | claimed {} | duplicates {} | rejected {} | unchecked {}",
            report.round,
            report.checked,
            report.candidates,
            report.claimed,
            report.duplicates,
            report.rejected,
            report.check_failed
        ),
        None => warn!(target: "claims", "Nothing to claim"),
    }
    Ok(())
}

fn plan(keeper: &Keeper) -> Result<()> {
    let queue = keeper.bets.plan()?;
    for (group, size) in queue_sizes(&queue) {
        println!("{:<12} {} bets", group, size);
    }
    println!("{:<12} {} bets", "total", queue.len());
    Ok(())
}

async fn init_players(keeper: &Keeper) -> Result<()> {
    let summary = keeper.players.run(keeper.source.as_ref()).await?;
    if summary.failed > 0 {
        warn!(
            "{} of {} players failed to initialize, run init-players again",
            summary.failed, summary.total
        );
    }
    Ok(())
}
