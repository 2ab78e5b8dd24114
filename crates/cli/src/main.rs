use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal_macros::dec;
use spikebot_core::config::{AppConfig, TradingMode};
use spikebot_core::traits::QuoteSource;
use spikebot_core::ConfigLoader;
use spikebot_data::TradeLog;
use spikebot_engine::DecisionEngine;
use std::sync::Arc;

mod paper;

use paper::{PaperAccount, PaperBalances, PaperOrderSink, PaperQuoteSource};

#[derive(Parser)]
#[command(name = "spikebot")]
#[command(about = "Spike and cross-venue arbitrage trading engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine with paper-trading adapters
    Run {
        /// Config file path
        #[arg(short, long, default_value = "config/Config.toml")]
        config: String,
        /// Profile overlay, e.g. `paper` layers Config.paper.toml
        #[arg(long)]
        profile: Option<String>,
        /// Seed for the paper-venue price walk
        #[arg(long, default_value_t = 7)]
        seed: u64,
    },
    /// Summarize the trade history CSV
    Report {
        /// Trade log path
        #[arg(long, default_value = "trade_history.csv")]
        trade_log: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            profile,
            seed,
        } => run(&config, profile.as_deref(), seed).await,
        Commands::Report { trade_log } => report(&trade_log),
    }
}

async fn run(config_path: &str, profile: Option<&str>, seed: u64) -> Result<()> {
    let config = match profile {
        Some(profile) => ConfigLoader::load_with_profile(profile)?,
        None => ConfigLoader::load_from(config_path)?,
    };

    let venues = venues_for(&config);
    let quote_asset = quote_asset_for(&config).to_string();

    let sources: Vec<Arc<dyn QuoteSource>> = venues
        .iter()
        .enumerate()
        .map(|(index, venue)| {
            Arc::new(PaperQuoteSource::new(
                venue.clone(),
                dec!(100),
                seed.wrapping_add(index as u64),
            )) as Arc<dyn QuoteSource>
        })
        .collect();

    let account = PaperAccount::new(&[(quote_asset.as_str(), dec!(10000))]);
    let balances = PaperBalances::new(&account);
    let orders = PaperOrderSink::new(&account, quote_asset);

    let mut engine = DecisionEngine::new(config, sources, balances, orders)?;
    engine.run().await?;
    Ok(())
}

fn venues_for(config: &AppConfig) -> Vec<String> {
    match config.engine.mode {
        TradingMode::Momentum => vec![config.momentum.venue.clone()],
        TradingMode::Arbitrage => config.arbitrage.venues.clone(),
        TradingMode::Scan => vec![config.scan.venue.clone()],
    }
}

fn quote_asset_for(config: &AppConfig) -> &str {
    match config.engine.mode {
        TradingMode::Momentum => &config.momentum.quote_asset,
        TradingMode::Arbitrage => &config.arbitrage.quote_asset,
        TradingMode::Scan => &config.scan.quote_asset,
    }
}

fn report(trade_log: &str) -> Result<()> {
    let summary = TradeLog::new(trade_log).summarize()?;
    println!("Trade performance summary");
    println!("  total trades: {}", summary.total_trades);
    println!("  buys:         {}", summary.buys);
    println!("  sells:        {}", summary.sells);
    println!("  take profits: {}", summary.take_profits);
    println!("  stop losses:  {}", summary.stop_losses);
    println!("  total return: {:.4}%", summary.total_return * dec!(100));
    Ok(())
}
