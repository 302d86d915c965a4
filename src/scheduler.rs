// =============================================================================
// Scheduler — wall-clock aligned daemon loop
// =============================================================================
//
// Each tick processes the configured exchanges one after another:
//
//   fetch → aggregate → format → notify
//
// A failing exchange is logged, reported to the chat as an error message and
// skipped until the next tick.  Nothing here ever terminates the loop except
// the interrupt signal.
// =============================================================================

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::config::{AppConfig, Credentials};
use crate::notifier::TelegramNotifier;
use crate::pipeline;
use crate::report::{render_error, render_telegram};
use crate::types::Exchange;

/// First instant strictly after `now` that is a whole multiple of `interval`
/// since the UNIX epoch.  With a one-hour interval that is the next `:00`.
pub fn next_tick(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let step = interval.as_secs().max(1) as i64;
    let next = (now.timestamp().div_euclid(step) + 1) * step;
    DateTime::<Utc>::from_timestamp(next, 0).unwrap_or(now + chrono::Duration::seconds(step))
}

async fn notify(notifier: &TelegramNotifier, exchange: Exchange, text: &str) {
    if let Err(e) = notifier.send(text).await {
        error!(exchange = %exchange, error = %e, "failed to deliver report");
    }
}

/// One pass over every daemon exchange.
pub async fn run_cycle(config: &AppConfig, credentials: &Credentials, notifier: &TelegramNotifier) {
    let rules = config.rules();
    let exchanges = &config.daemon_exchanges;
    info!(exchanges = ?exchanges, "starting scheduled analysis");

    for (i, &exchange) in exchanges.iter().enumerate() {
        match pipeline::run(exchange, credentials, &rules).await {
            Ok(analysis) => {
                let message = render_telegram(&analysis.context(&rules));
                notify(notifier, exchange, &message).await;
                info!(exchange = %exchange, "report cycle finished");
            }
            Err(e) => {
                error!(
                    exchange = %exchange,
                    error = %e,
                    transient = e.is_transient(),
                    "analysis failed, skipping until next tick"
                );
                notify(notifier, exchange, &render_error(exchange, &e)).await;
            }
        }

        if i + 1 < exchanges.len() && config.exchange_delay_secs > 0 {
            info!(delay_secs = config.exchange_delay_secs, "waiting before next exchange");
            tokio::time::sleep(Duration::from_secs(config.exchange_delay_secs)).await;
        }
    }
}

/// Run until interrupted.
pub async fn run_daemon(
    config: &AppConfig,
    credentials: &Credentials,
    notifier: &TelegramNotifier,
) -> anyhow::Result<()> {
    let interval = Duration::from_secs(config.interval_secs);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        interval_secs = config.interval_secs,
        exchanges = ?config.daemon_exchanges,
        "daemon started. Press Ctrl+C to stop."
    );

    let mut run_now = config.run_on_start;
    loop {
        if !run_now {
            let now = Utc::now();
            let next = next_tick(now, interval);
            let wait = (next - now).to_std().unwrap_or_default();
            info!(next_run = %next, "next analysis scheduled");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                res = &mut shutdown => {
                    res?;
                    warn!("shutdown signal received");
                    return Ok(());
                }
            }
        }
        run_now = false;

        tokio::select! {
            _ = run_cycle(config, credentials, notifier) => {}
            res = &mut shutdown => {
                res?;
                warn!("shutdown signal received during cycle");
                return Ok(());
            }
        }
    }
}
