// =============================================================================
// Binance USD-M Futures REST client — HMAC-SHA256 signed requests
// =============================================================================
//
// SECURITY: The secret key is never logged or serialized. All signed requests
// include X-MBX-APIKEY as a header and a recvWindow of 5 000 ms to tolerate
// minor clock drift between this host and Binance servers.
// =============================================================================

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderValue};
use tracing::{debug, instrument, warn};

use super::rate_limit::RateLimitTracker;
use super::{build_http_client, check_http_status, hmac_sha256, parse_f64, read_json, timestamp_ms};
use crate::error::{Error, Result};
use crate::types::{AccountBalance, Exchange, PositionRecord, Side};

const BASE_URL: &str = "https://fapi.binance.com";

/// Default recv-window sent with every signed request (milliseconds).
const RECV_WINDOW: u64 = 5000;

/// Request weight of GET /fapi/v2/positionRisk and GET /fapi/v2/account.
const POSITION_RISK_WEIGHT: u32 = 5;
const ACCOUNT_WEIGHT: u32 = 5;

/// -2014 bad key format, -2015 invalid key/IP/permissions, -1022 bad signature.
const AUTH_ERROR_CODES: [i64; 3] = [-2014, -2015, -1022];

/// Binance futures client with HMAC-SHA256 request signing.
#[derive(Clone)]
pub struct BinanceClient {
    secret: String,
    base_url: String,
    client: reqwest::Client,
    rate_limit: Arc<RateLimitTracker>,
}

impl BinanceClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a new `BinanceClient`.
    ///
    /// # Arguments
    /// * `api_key`: Binance API key (sent as a header, never in query params).
    /// * `secret`:  Binance secret key used exclusively for HMAC signing.
    pub fn new(api_key: &str, secret: &str) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        let key = HeaderValue::from_str(api_key)
            .map_err(|_| Error::auth(Exchange::Binance, "API key contains invalid characters"))?;
        default_headers.insert("X-MBX-APIKEY", key);

        debug!("BinanceClient initialised (base_url={BASE_URL})");

        Ok(Self {
            secret: secret.to_string(),
            base_url: BASE_URL.to_string(),
            client: build_http_client(default_headers)?,
            rate_limit: Arc::new(RateLimitTracker::new()),
        })
    }

    /// Point the client at another host (testnet, mock server).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    #[cfg(test)]
    pub fn rate_limit(&self) -> &RateLimitTracker {
        &self.rate_limit
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    /// Produce an HMAC-SHA256 hex signature of `query`.
    pub fn sign(&self, query: &str) -> String {
        hex::encode(hmac_sha256(&self.secret, query))
    }

    /// Build the full query string for a signed request (appends timestamp,
    /// recvWindow, and signature).
    fn signed_query(&self, params: &str) -> String {
        let ts = timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    async fn signed_get(&self, path: &str, params: &str, weight: u32) -> Result<serde_json::Value> {
        if !self.rate_limit.can_send_request(weight) {
            return Err(Error::Connectivity(format!(
                "binance request weight cap reached (used {}), skipping {path}",
                self.rate_limit.used_weight()
            )));
        }

        let url = format!("{}{}?{}", self.base_url, path, self.signed_query(params));
        let resp = self.client.get(&url).send().await?;
        self.rate_limit.update_from_headers(resp.headers());

        let (status, body) = read_json(resp, path).await?;

        // Error bodies look like {"code": -2015, "msg": "..."}.
        if let Some(code) = body.get("code").and_then(|c| c.as_i64()) {
            let msg = body["msg"].as_str().unwrap_or_default().to_string();
            if AUTH_ERROR_CODES.contains(&code) {
                return Err(Error::auth(Exchange::Binance, format!("{code}: {msg}")));
            }
            if code < 0 {
                check_http_status(Exchange::Binance, status, &body)?;
                return Err(Error::Exchange {
                    exchange: Exchange::Binance,
                    code: code.to_string(),
                    message: msg,
                });
            }
        }

        check_http_status(Exchange::Binance, status, &body)?;
        if !status.is_success() {
            return Err(Error::Exchange {
                exchange: Exchange::Binance,
                code: status.as_u16().to_string(),
                message: body.to_string(),
            });
        }

        Ok(body)
    }

    // -------------------------------------------------------------------------
    // Positions / balance
    // -------------------------------------------------------------------------

    /// GET /fapi/v2/positionRisk (signed), non-zero positions only.
    #[instrument(skip(self), name = "binance::get_positions")]
    pub async fn get_positions(&self) -> Result<Vec<PositionRecord>> {
        let body = self
            .signed_get("/fapi/v2/positionRisk", "", POSITION_RISK_WEIGHT)
            .await?;
        let positions = parse_positions(&body)?;
        debug!(count = positions.len(), "open positions retrieved");
        Ok(positions)
    }

    /// GET /fapi/v2/account (signed).
    #[instrument(skip(self), name = "binance::get_balance")]
    pub async fn get_balance(&self) -> Result<AccountBalance> {
        let body = self.signed_get("/fapi/v2/account", "", ACCOUNT_WEIGHT).await?;
        let balance = AccountBalance {
            wallet_balance: parse_f64(&body["totalWalletBalance"], "totalWalletBalance")?,
            margin_balance: parse_f64(&body["totalMarginBalance"], "totalMarginBalance")?,
            unrealized_pnl: parse_f64(&body["totalUnrealizedProfit"], "totalUnrealizedProfit")?,
        };
        debug!(wallet = balance.wallet_balance, "account balance retrieved");
        Ok(balance)
    }
}

/// Parse the positionRisk array.  Side follows the sign of `positionAmt`,
/// which also covers hedge mode where SHORT legs carry negative amounts.
fn parse_positions(body: &serde_json::Value) -> Result<Vec<PositionRecord>> {
    let entries = body
        .as_array()
        .ok_or_else(|| Error::data("binance positionRisk", "response is not an array"))?;

    let mut out = Vec::new();
    for entry in entries {
        let Some(symbol) = entry["symbol"].as_str() else {
            warn!("skipping positionRisk entry without symbol");
            continue;
        };
        let amount = parse_f64(&entry["positionAmt"], "positionAmt")?;
        if amount == 0.0 {
            continue;
        }
        let notional = parse_f64(&entry["notional"], "notional")?;
        let pnl = parse_f64(&entry["unRealizedProfit"], "unRealizedProfit")?;
        let side = if amount > 0.0 { Side::Long } else { Side::Short };
        out.push(PositionRecord::new(symbol, side, notional, pnl));
    }
    Ok(out)
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("rate_limit", &self.rate_limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn sign_matches_documented_vector() {
        let client = BinanceClient::new(
            "vmPUZE6mv9SD5VNHk4HlWFsOr6aKE2zvsw0MuIgwCIPy6utIco14y7Ju91duEh8A",
            "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j",
        )
        .unwrap();
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            client.sign(query),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn debug_redacts_secret() {
        let client = BinanceClient::new("key", "very-secret").unwrap();
        assert!(!format!("{client:?}").contains("very-secret"));
    }

    #[test]
    fn parse_positions_skips_flat_and_reads_sign() {
        let body = json!([
            {"symbol": "BTCUSDT", "positionAmt": "0.5", "notional": "30000.0", "unRealizedProfit": "12.5"},
            {"symbol": "ETHUSDT", "positionAmt": "-2", "notional": "-6000.0", "unRealizedProfit": "-3"},
            {"symbol": "SOLUSDT", "positionAmt": "0.000", "notional": "0", "unRealizedProfit": "0"}
        ]);
        let positions = parse_positions(&body).unwrap();
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].side, Side::Long);
        assert_eq!(positions[1].side, Side::Short);
        assert_eq!(positions[1].notional, 6000.0);
        assert_eq!(positions[1].unrealized_pnl, -3.0);
    }

    #[test]
    fn parse_positions_rejects_non_numeric_fields() {
        let body = json!([{"symbol": "BTCUSDT", "positionAmt": "1", "notional": "n/a", "unRealizedProfit": "0"}]);
        assert!(matches!(parse_positions(&body), Err(Error::Data { .. })));
    }

    #[test]
    fn parse_positions_rejects_nan_notional() {
        let body = json!([{"symbol": "ETHUSDT", "positionAmt": "1", "notional": "NaN", "unRealizedProfit": "0"}]);
        assert!(matches!(parse_positions(&body), Err(Error::Data { .. })));
    }

    #[tokio::test]
    async fn fetches_positions_and_tracks_weight() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v2/positionRisk"))
            .and(header("X-MBX-APIKEY", "test-key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-MBX-USED-WEIGHT-1M", "37")
                    .set_body_json(json!([
                        {"symbol": "BTCUSDT", "positionAmt": "0.1", "notional": "6500.5", "unRealizedProfit": "10"}
                    ])),
            )
            .mount(&server)
            .await;

        let client = BinanceClient::new("test-key", "test-secret")
            .unwrap()
            .with_base_url(server.uri());
        let positions = client.get_positions().await.unwrap();

        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].symbol, "BTCUSDT");
        assert_eq!(client.rate_limit().used_weight(), 37);
    }

    #[tokio::test]
    async fn invalid_key_maps_to_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v2/positionRisk"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "code": -2015,
                "msg": "Invalid API-key, IP, or permissions for action."
            })))
            .mount(&server)
            .await;

        let client = BinanceClient::new("k", "s").unwrap().with_base_url(server.uri());
        let err = client.get_positions().await.unwrap_err();
        assert!(matches!(err, Error::Auth { exchange: Exchange::Binance, .. }));
    }

    #[tokio::test]
    async fn server_error_maps_to_connectivity() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v2/account"))
            .respond_with(ResponseTemplate::new(503).set_body_string("<html>down</html>"))
            .mount(&server)
            .await;

        let client = BinanceClient::new("k", "s").unwrap().with_base_url(server.uri());
        let err = client.get_balance().await.unwrap_err();
        assert!(matches!(err, Error::Connectivity(_)));
    }

    #[tokio::test]
    async fn fetches_account_balance() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fapi/v2/account"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "totalWalletBalance": "1000.00",
                "totalMarginBalance": "1100.50",
                "totalUnrealizedProfit": "100.50"
            })))
            .mount(&server)
            .await;

        let client = BinanceClient::new("k", "s").unwrap().with_base_url(server.uri());
        let balance = client.get_balance().await.unwrap();
        assert_eq!(balance.wallet_balance, 1000.0);
        assert_eq!(balance.margin_balance, 1100.5);
        assert_eq!(balance.unrealized_pnl, 100.5);
    }
}
