// =============================================================================
// Exchange clients — signed REST fetchers for open perpetual positions
// =============================================================================
//
// Each venue has its own client with its own signing scheme; `ExchangeClient`
// dispatches over them so the pipeline never cares which one it holds.
//
// Every client normalises exchange payloads into `PositionRecord`s (absolute
// notional + side) and `AccountBalance`, and maps failures onto the shared
// error taxonomy:
//
//   transport / 5xx          → Error::Connectivity
//   401 / 403 / auth codes   → Error::Auth
//   unparsable payload       → Error::Data
//   anything else non-OK     → Error::Exchange
// =============================================================================

pub mod binance;
pub mod bitget;
pub mod bybit;
pub mod rate_limit;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use sha2::Sha256;
use tracing::debug;

use crate::config::Credentials;
use crate::error::{Error, Result};
use crate::types::{AccountBalance, Exchange, PositionRecord};

pub use binance::BinanceClient;
pub use bitget::BitgetClient;
pub use bybit::BybitClient;

type HmacSha256 = Hmac<Sha256>;

/// Per-request timeout shared by all clients.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One authenticated client per supported venue.
#[derive(Debug, Clone)]
pub enum ExchangeClient {
    Binance(BinanceClient),
    Bybit(BybitClient),
    Bitget(BitgetClient),
}

impl ExchangeClient {
    /// Build the client for `exchange`, failing early when its credentials
    /// are incomplete.
    pub fn connect(exchange: Exchange, credentials: &Credentials) -> Result<Self> {
        let creds = credentials.for_exchange(exchange);
        if !creds.is_complete() {
            return Err(Error::auth(exchange, "API key or secret not configured"));
        }

        let client = match exchange {
            Exchange::Binance => Self::Binance(BinanceClient::new(&creds.api_key, &creds.secret)?),
            Exchange::Bybit => Self::Bybit(BybitClient::new(&creds.api_key, &creds.secret)?),
            Exchange::Bitget => {
                let passphrase = creds
                    .passphrase
                    .as_deref()
                    .ok_or_else(|| Error::auth(exchange, "passphrase not configured"))?;
                Self::Bitget(BitgetClient::new(&creds.api_key, &creds.secret, passphrase)?)
            }
        };

        debug!(exchange = %exchange, "exchange client ready");
        Ok(client)
    }

    pub fn exchange(&self) -> Exchange {
        match self {
            Self::Binance(_) => Exchange::Binance,
            Self::Bybit(_) => Exchange::Bybit,
            Self::Bitget(_) => Exchange::Bitget,
        }
    }

    /// All open perpetual positions on the account (zero-size entries removed).
    pub async fn fetch_positions(&self) -> Result<Vec<PositionRecord>> {
        match self {
            Self::Binance(c) => c.get_positions().await,
            Self::Bybit(c) => c.get_positions().await,
            Self::Bitget(c) => c.get_positions().await,
        }
    }

    pub async fn fetch_balance(&self) -> Result<AccountBalance> {
        match self {
            Self::Binance(c) => c.get_balance().await,
            Self::Bybit(c) => c.get_balance().await,
            Self::Bitget(c) => c.get_balance().await,
        }
    }
}

// -----------------------------------------------------------------------------
// Shared helpers
// -----------------------------------------------------------------------------

pub(crate) fn build_http_client(default_headers: HeaderMap) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .default_headers(default_headers)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| Error::Connectivity(format!("failed to build HTTP client: {e}")))
}

/// Current UNIX timestamp in milliseconds.
pub(crate) fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub(crate) fn hmac_sha256(secret: &str, payload: &str) -> Vec<u8> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(payload.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Read a response as JSON, keeping the status for the caller to classify.
pub(crate) async fn read_json(
    resp: reqwest::Response,
    context: &str,
) -> Result<(StatusCode, serde_json::Value)> {
    let status = resp.status();
    let text = resp.text().await?;
    match serde_json::from_str(&text) {
        Ok(body) => Ok((status, body)),
        // Gateways sometimes answer errors with HTML; the status says more.
        Err(_) if !status.is_success() => Ok((status, serde_json::Value::String(text))),
        Err(e) => Err(Error::data(context, e.to_string())),
    }
}

/// Map non-success HTTP statuses that mean the same thing on every venue.
pub(crate) fn check_http_status(
    exchange: Exchange,
    status: StatusCode,
    body: &serde_json::Value,
) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(Error::auth(exchange, format!("HTTP {status}: {body}")));
    }
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(Error::Connectivity(format!("{exchange} returned HTTP {status}")));
    }
    Ok(())
}

/// Parse a JSON value that may be either a string or a number into a finite
/// `f64`.
pub(crate) fn parse_f64(val: &serde_json::Value, field: &str) -> Result<f64> {
    if let Some(s) = val.as_str() {
        if s.is_empty() {
            return Ok(0.0);
        }
        match s.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(v),
            Ok(_) => Err(Error::data(field, format!("'{s}' is not a finite number"))),
            Err(_) => Err(Error::data(field, format!("'{s}' is not a number"))),
        }
    } else if let Some(n) = val.as_f64() {
        Ok(n)
    } else if val.is_null() {
        Err(Error::data(field, "missing"))
    } else {
        Err(Error::data(field, format!("expected string or number, got {val}")))
    }
}

/// Like [`parse_f64`] but absent/empty fields read as zero.
pub(crate) fn parse_f64_or_zero(val: &serde_json::Value, field: &str) -> Result<f64> {
    if val.is_null() {
        Ok(0.0)
    } else {
        parse_f64(val, field)
    }
}
