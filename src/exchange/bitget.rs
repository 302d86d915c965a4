// =============================================================================
// Bitget V2 REST client — USDT-M futures
// =============================================================================
//
// Signing: base64(HMAC-SHA256(secret, timestamp + METHOD + path + "?" + query))
// with ACCESS-KEY / ACCESS-SIGN / ACCESS-TIMESTAMP / ACCESS-PASSPHRASE headers.
// Success bodies carry `code == "00000"`.
// =============================================================================

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tracing::{debug, instrument, warn};

use super::{build_http_client, check_http_status, hmac_sha256, parse_f64, parse_f64_or_zero, read_json, timestamp_ms};
use crate::error::{Error, Result};
use crate::types::{AccountBalance, Exchange, PositionRecord, Side};

const BASE_URL: &str = "https://api.bitget.com";
const PRODUCT_TYPE: &str = "USDT-FUTURES";
const MARGIN_COIN: &str = "USDT";
const SUCCESS_CODE: &str = "00000";

/// 40006 invalid key, 40009 bad signature, 40012 wrong key/passphrase, 40037 unknown key.
const AUTH_CODES: [&str; 4] = ["40006", "40009", "40012", "40037"];

#[derive(Clone)]
pub struct BitgetClient {
    api_key: String,
    secret: String,
    passphrase: String,
    base_url: String,
    client: reqwest::Client,
}

impl BitgetClient {
    pub fn new(api_key: &str, secret: &str, passphrase: &str) -> Result<Self> {
        Ok(Self {
            api_key: api_key.to_string(),
            secret: secret.to_string(),
            passphrase: passphrase.to_string(),
            base_url: BASE_URL.to_string(),
            client: build_http_client(Default::default())?,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Signature for a GET of `path?query` issued at `timestamp`.
    pub fn signature(&self, timestamp: u64, path: &str, query: &str) -> String {
        let payload = format!("{timestamp}GET{path}?{query}");
        BASE64.encode(hmac_sha256(&self.secret, &payload))
    }

    async fn signed_get(&self, path: &str, query: &str) -> Result<serde_json::Value> {
        let ts = timestamp_ms();
        let url = format!("{}{}?{}", self.base_url, path, query);

        let resp = self
            .client
            .get(&url)
            .header("ACCESS-KEY", &self.api_key)
            .header("ACCESS-SIGN", self.signature(ts, path, query))
            .header("ACCESS-TIMESTAMP", ts.to_string())
            .header("ACCESS-PASSPHRASE", &self.passphrase)
            .header("locale", "en-US")
            .send()
            .await?;

        let (status, body) = read_json(resp, path).await?;
        check_http_status(Exchange::Bitget, status, &body)?;

        let code = body["code"].as_str().unwrap_or_default();
        if code != SUCCESS_CODE {
            let msg = body["msg"].as_str().unwrap_or_default().to_string();
            if AUTH_CODES.contains(&code) {
                return Err(Error::auth(Exchange::Bitget, format!("{code}: {msg}")));
            }
            return Err(Error::Exchange {
                exchange: Exchange::Bitget,
                code: if code.is_empty() {
                    status.as_u16().to_string()
                } else {
                    code.to_string()
                },
                message: msg,
            });
        }

        Ok(body)
    }

    /// GET /api/v2/mix/position/all-position.
    #[instrument(skip(self), name = "bitget::get_positions")]
    pub async fn get_positions(&self) -> Result<Vec<PositionRecord>> {
        let query = format!("productType={PRODUCT_TYPE}&marginCoin={MARGIN_COIN}");
        let body = self
            .signed_get("/api/v2/mix/position/all-position", &query)
            .await?;
        let positions = parse_positions(&body)?;
        debug!(count = positions.len(), "open positions retrieved");
        Ok(positions)
    }

    /// GET /api/v2/mix/account/accounts, USDT margin-coin entry.
    #[instrument(skip(self), name = "bitget::get_balance")]
    pub async fn get_balance(&self) -> Result<AccountBalance> {
        let query = format!("productType={PRODUCT_TYPE}");
        let body = self.signed_get("/api/v2/mix/account/accounts", &query).await?;
        parse_balance(&body)
    }
}

fn parse_positions(body: &serde_json::Value) -> Result<Vec<PositionRecord>> {
    // An account with no positions may answer `data: null`.
    if body["data"].is_null() {
        return Ok(Vec::new());
    }
    let entries = body["data"]
        .as_array()
        .ok_or_else(|| Error::data("bitget all-position", "data is not an array"))?;

    let mut out = Vec::new();
    for entry in entries {
        let Some(symbol) = entry["symbol"].as_str() else {
            warn!("skipping position entry without symbol");
            continue;
        };
        let side = match entry["holdSide"].as_str() {
            Some("long") => Side::Long,
            Some("short") => Side::Short,
            other => {
                warn!(symbol, hold_side = ?other, "skipping position with unknown holdSide");
                continue;
            }
        };
        let total = parse_f64(&entry["total"], "total")?;
        if total == 0.0 {
            continue;
        }
        let mark = parse_f64(&entry["markPrice"], "markPrice")?;
        let pnl = parse_f64_or_zero(&entry["unrealizedPL"], "unrealizedPL")?;
        out.push(PositionRecord::new(symbol, side, total * mark, pnl));
    }
    Ok(out)
}

fn parse_balance(body: &serde_json::Value) -> Result<AccountBalance> {
    let accounts = body["data"]
        .as_array()
        .ok_or_else(|| Error::data("bitget accounts", "data is not an array"))?;

    let usdt = accounts
        .iter()
        .find(|a| a["marginCoin"].as_str() == Some(MARGIN_COIN))
        .ok_or_else(|| Error::data("bitget accounts", "no USDT margin account"))?;

    let available = parse_f64_or_zero(&usdt["available"], "available")?;
    let locked = parse_f64_or_zero(&usdt["locked"], "locked")?;
    let wallet = available + locked;
    let equity = match &usdt["accountEquity"] {
        v if v.is_null() => wallet,
        v => parse_f64(v, "accountEquity")?,
    };

    Ok(AccountBalance {
        wallet_balance: wallet,
        margin_balance: equity,
        unrealized_pnl: parse_f64_or_zero(&usdt["unrealizedPL"], "unrealizedPL")?,
    })
}

impl std::fmt::Debug for BitgetClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitgetClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("passphrase", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}
