mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use fxbot_brokers_common::SimulatedTerminal;
use fxbot_brokers_metatrader::MetaTraderBridge;
use fxbot_core::{Credentials, TradingPlatform};
use fxbot_engine::{run_strategy_loop, start_session, RunSummary, TerminationPolicy};
use fxbot_strategies::BreakoutReversalStrategy;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::BotConfig;

#[derive(Parser)]
#[command(name = "fxbot")]
#[command(about = "One-symbol M1 breakout/reversal bot for MetaTrader 5")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Path to a TOML config file
    #[arg(short, long, env = "FXBOT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trade live through the MetaTrader bridge
    Run {
        /// Trading account number
        #[arg(long, env = "MT5_LOGIN")]
        login: u64,

        /// Trading account password
        #[arg(long, env = "MT5_PASSWORD", hide_env_values = true)]
        password: String,

        /// Broker server name
        #[arg(long, env = "MT5_SERVER")]
        server: String,

        /// Stop after this many iterations (overrides the config file)
        #[arg(long)]
        iterations: Option<u64>,
    },

    /// Replay a CSV of M1 bars through a simulated terminal
    Replay {
        /// Path to CSV data file
        #[arg(short, long)]
        data: PathBuf,

        /// Symbol to assign to the bars (defaults to the configured symbol)
        #[arg(short, long)]
        symbol: Option<String>,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = BotConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            login,
            password,
            server,
            iterations,
        } => {
            if iterations.is_some() {
                config.trading.iterations = iterations;
            }
            let credentials = Credentials {
                login,
                password,
                server,
            };
            run_live(&config, &credentials).await?;
        }
        Commands::Replay { data, symbol } => {
            run_replay(&config, data, symbol).await?;
        }
        Commands::ShowConfig => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

async fn run_live(config: &BotConfig, credentials: &Credentials) -> Result<()> {
    let loop_config = config.loop_config()?;
    let strategy = BreakoutReversalStrategy::new(config.strategy.clone());
    let mut bridge = MetaTraderBridge::new(config.bridge.clone());

    tracing::info!(
        symbol = %loop_config.symbol,
        quantity = %loop_config.quantity,
        bridge = %format!("{}:{}", config.bridge.host, config.bridge.port),
        "Starting live session"
    );

    if let Err(e) = start_session(&mut bridge, credentials).await {
        tracing::error!(error = %e, "Startup failed");
        return Err(e.into());
    }

    let summary = run_strategy_loop(&mut bridge, &strategy, loop_config).await;

    if let Err(e) = bridge.shutdown().await {
        tracing::warn!(error = %e, "Bridge shutdown failed");
    }

    print_summary("LIVE SESSION", &summary);
    Ok(())
}

async fn run_replay(config: &BotConfig, data: PathBuf, symbol: Option<String>) -> Result<()> {
    let symbol = symbol.unwrap_or_else(|| config.trading.symbol.clone());

    tracing::info!(symbol = %symbol, data = %data.display(), "Starting replay");

    let bars = fxbot_data::load_bars_from_csv(&data, Some(&symbol))?;
    tracing::info!(bars = bars.len(), "Loaded historical data");

    if bars.len() < 2 {
        anyhow::bail!("Replay needs at least two bars, found {}", bars.len());
    }

    let iterations = bars.len() as u64;
    let mut terminal = SimulatedTerminal::new(config.terminal_config(&symbol), bars);
    let credentials = Credentials {
        login: 0,
        password: String::new(),
        server: "Simulated".to_string(),
    };
    start_session(&mut terminal, &credentials).await?;

    let mut loop_config = config.loop_config()?;
    loop_config.symbol = symbol;
    loop_config.poll_interval = Duration::ZERO;
    loop_config.termination = TerminationPolicy::Bounded(iterations);

    let strategy = BreakoutReversalStrategy::new(config.strategy.clone());
    let summary = run_strategy_loop(&mut terminal, &strategy, loop_config).await;

    print_summary("REPLAY RESULTS", &summary);
    println!("  Final Balance:   {}", terminal.balance());
    println!("  Open Positions:  {}", terminal.positions().len());
    println!();
    Ok(())
}

fn print_summary(title: &str, summary: &RunSummary) {
    let closed = summary.deals.iter().filter(|d| d.is_closed()).count();
    let sep = "=".repeat(60);
    println!("\n{sep}");
    println!("  {title}");
    println!("{sep}");
    println!("  Iterations:      {}", summary.iterations);
    println!("  Skipped:         {}", summary.skipped_iterations);
    println!("  Orders Sent:     {}", summary.orders_sent);
    println!("  Orders Failed:   {}", summary.orders_failed);
    println!("  Deals:           {} ({} closed)", summary.deals.len(), closed);
    println!("  Realized Profit: {}", summary.realized_profit);
    println!("{sep}");
}
