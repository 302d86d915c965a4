// =============================================================================
// Configuration — JSON settings file plus credentials from the environment
// =============================================================================
//
// All fields carry `#[serde(default)]` so that a partial (or empty) settings
// file always loads.  Secrets never live in the settings file; they come from
// the environment (optionally via `.env`).
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::aggregator::{AggregationRules, WeightRule};
use crate::error::Error;
use crate::types::Exchange;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_excluded_tickers() -> Vec<String> {
    vec!["PAXGUSDT".to_string(), "BTCDOMUSDT".to_string()]
}

fn default_weights() -> Vec<WeightRule> {
    vec![WeightRule {
        prefix: "BTC".to_string(),
        weight: 0.5,
    }]
}

fn default_daemon_exchanges() -> Vec<Exchange> {
    vec![Exchange::Binance, Exchange::Bybit]
}

fn default_interval_secs() -> u64 {
    3600
}

fn default_exchange_delay_secs() -> u64 {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_parse_mode() -> String {
    "Markdown".to_string()
}

// =============================================================================
// TelegramSettings
// =============================================================================

/// Delivery tuning for the Telegram notifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramSettings {
    /// Retries after a 429 before giving up on a message.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_parse_mode")]
    pub parse_mode: String,
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            parse_mode: default_parse_mode(),
        }
    }
}

// =============================================================================
// AppConfig
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Tickers removed before netting, in any symbol notation.
    #[serde(default = "default_excluded_tickers")]
    pub excluded_tickers: Vec<String>,

    /// Ordered prefix → weight rules; first match wins.
    #[serde(default = "default_weights")]
    pub weights: Vec<WeightRule>,

    /// Exchanges processed on every daemon tick.
    #[serde(default = "default_daemon_exchanges")]
    pub daemon_exchanges: Vec<Exchange>,

    /// Daemon period.  Ticks are aligned to multiples of this on the UTC clock.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Pause between exchanges within a tick.
    #[serde(default = "default_exchange_delay_secs")]
    pub exchange_delay_secs: u64,

    /// Run one cycle immediately when the daemon starts.
    #[serde(default)]
    pub run_on_start: bool,

    #[serde(default)]
    pub telegram: TelegramSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            excluded_tickers: default_excluded_tickers(),
            weights: default_weights(),
            daemon_exchanges: default_daemon_exchanges(),
            interval_secs: default_interval_secs(),
            exchange_delay_secs: default_exchange_delay_secs(),
            run_on_start: false,
            telegram: TelegramSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("config at {} rejected", path.display()))?;

        info!(
            path = %path.display(),
            excluded = ?config.excluded_tickers,
            daemon_exchanges = ?config.daemon_exchanges,
            "config loaded"
        );

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        for rule in &self.weights {
            if !rule.weight.is_finite() || rule.weight < 0.0 {
                return Err(Error::Config(format!(
                    "weight for prefix '{}' must be a non-negative number, got {}",
                    rule.prefix, rule.weight
                )));
            }
            if rule.prefix.trim().is_empty() {
                return Err(Error::Config("weight rule with empty prefix".into()));
            }
        }
        if self.interval_secs == 0 {
            return Err(Error::Config("interval_secs must be > 0".into()));
        }
        if self.daemon_exchanges.is_empty() {
            return Err(Error::Config("daemon_exchanges must not be empty".into()));
        }
        Ok(())
    }

    /// Aggregation rules derived from the exclusion list and weight table.
    pub fn rules(&self) -> AggregationRules {
        AggregationRules::new(self.excluded_tickers.iter(), self.weights.clone())
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// API key pair for one exchange.  Never logged.
#[derive(Clone, Default)]
pub struct ApiCredentials {
    pub api_key: String,
    pub secret: String,
    /// Only Bitget requires one.
    pub passphrase: Option<String>,
}

impl ApiCredentials {
    pub fn is_complete(&self) -> bool {
        !self.api_key.is_empty() && !self.secret.is_empty()
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Clone)]
pub struct TelegramCredentials {
    pub bot_token: String,
    pub chat_id: String,
}

impl std::fmt::Debug for TelegramCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramCredentials")
            .field("bot_token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

/// Every secret the tool may need, read once at startup.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub binance: ApiCredentials,
    pub bybit: ApiCredentials,
    pub bitget: ApiCredentials,
    pub telegram: Option<TelegramCredentials>,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; empty values count as missing.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let pair = |key: &str, secret: &str| ApiCredentials {
            api_key: get(key).unwrap_or_default(),
            secret: get(secret).unwrap_or_default(),
            passphrase: None,
        };

        let mut bitget = pair("BITGET_API_KEY", "BITGET_API_SECRET");
        bitget.passphrase = get("BITGET_PASSPHRASE");

        let telegram = match (get("TELEGRAM_BOT_TOKEN"), get("TELEGRAM_CHAT_ID")) {
            (Some(bot_token), Some(chat_id)) => Some(TelegramCredentials { bot_token, chat_id }),
            _ => None,
        };

        Self {
            binance: pair("BINANCE_API_KEY", "BINANCE_API_SECRET"),
            bybit: pair("BYBIT_API_KEY", "BYBIT_API_SECRET"),
            bitget,
            telegram,
        }
    }

    pub fn for_exchange(&self, exchange: Exchange) -> &ApiCredentials {
        match exchange {
            Exchange::Binance => &self.binance,
            Exchange::Bybit => &self.bybit,
            Exchange::Bitget => &self.bitget,
        }
    }
}
