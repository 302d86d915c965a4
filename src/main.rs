// =============================================================================
// perp-ratio — Main Entry Point
// =============================================================================
//
// One-shot mode prints a position analysis for a single exchange to stdout.
// Daemon mode posts the analysis for every configured exchange to Telegram
// once per interval, aligned to the wall clock.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod aggregator;
mod config;
mod error;
mod exchange;
mod notifier;
mod pipeline;
mod report;
mod scheduler;
mod types;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, Credentials};
use crate::notifier::TelegramNotifier;
use crate::types::Exchange;

/// Long/short exposure ratio across perpetual futures positions.
#[derive(Parser, Debug)]
#[command(name = "perp-ratio", version, about)]
struct Cli {
    /// Exchange to analyse in one-shot mode (binance, bybit, bitget).
    #[arg(short, long, default_value = "binance")]
    exchange: Exchange,

    /// Run continuously and deliver reports to Telegram.
    #[arg(long)]
    daemon: bool,

    /// JSON settings file.
    #[arg(long, default_value = "perp_ratio.json")]
    config: PathBuf,
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if !path.exists() {
        warn!(path = %path.display(), "config file not found, using defaults");
        return Ok(AppConfig::default());
    }
    AppConfig::load(path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & logging ─────────────────────────────────────────
    let _ = dotenv::dotenv();

    // stdout carries the report; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // ── 2. Config & credentials ──────────────────────────────────────────
    let config = load_config(&cli.config)?;
    let credentials = Credentials::from_env();
    let rules = config.rules();

    // ── 3. Daemon mode ───────────────────────────────────────────────────
    if cli.daemon {
        let telegram = credentials
            .telegram
            .as_ref()
            .context("daemon mode requires TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID")?;
        let notifier = TelegramNotifier::new(telegram, &config.telegram)?;

        scheduler::run_daemon(&config, &credentials, &notifier).await?;
        info!("Daemon stopped by user");
        return Ok(());
    }

    // ── 4. One-shot mode ─────────────────────────────────────────────────
    info!(exchange = %cli.exchange, "running one-shot analysis");
    let analysis = pipeline::run(cli.exchange, &credentials, &rules)
        .await
        .with_context(|| format!("failed to analyse {} positions", cli.exchange.label()))?;

    println!("{}", report::render_console(&analysis.context(&rules)));
    Ok(())
}
