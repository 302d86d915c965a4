// =============================================================================
// Bybit V5 REST client — linear (USDT-settled) perpetuals
// =============================================================================
//
// Signing: hex(HMAC-SHA256(secret, timestamp + api_key + recv_window + query))
// sent in X-BAPI-SIGN alongside X-BAPI-API-KEY / -TIMESTAMP / -RECV-WINDOW.
//
// Bybit answers most errors with HTTP 200 and a non-zero `retCode`.
// =============================================================================

use tracing::{debug, instrument, warn};

use super::{build_http_client, check_http_status, hmac_sha256, parse_f64, parse_f64_or_zero, read_json, timestamp_ms};
use crate::error::{Error, Result};
use crate::types::{AccountBalance, Exchange, PositionRecord, Side};

const BASE_URL: &str = "https://api.bybit.com";
const RECV_WINDOW: u64 = 5000;

/// Page size for /v5/position/list (exchange maximum).
const PAGE_LIMIT: u32 = 200;
/// Guard against a cursor that never runs dry.
const MAX_PAGES: usize = 20;

/// 10003 invalid key, 10004 bad signature, 10005 permission denied, 33004 key expired.
const AUTH_RET_CODES: [i64; 4] = [10003, 10004, 10005, 33004];

#[derive(Clone)]
pub struct BybitClient {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
}

impl BybitClient {
    pub fn new(api_key: &str, secret: &str) -> Result<Self> {
        Ok(Self {
            api_key: api_key.to_string(),
            secret: secret.to_string(),
            base_url: BASE_URL.to_string(),
            client: build_http_client(Default::default())?,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Signature for a GET request issued at `timestamp` with `query`.
    pub fn signature(&self, timestamp: u64, query: &str) -> String {
        let payload = format!("{timestamp}{}{RECV_WINDOW}{query}", self.api_key);
        hex::encode(hmac_sha256(&self.secret, &payload))
    }

    async fn signed_get(&self, path: &str, query: &str) -> Result<serde_json::Value> {
        let ts = timestamp_ms();
        let url = format!("{}{}?{}", self.base_url, path, query);

        let resp = self
            .client
            .get(&url)
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", ts.to_string())
            .header("X-BAPI-RECV-WINDOW", RECV_WINDOW.to_string())
            .header("X-BAPI-SIGN", self.signature(ts, query))
            .send()
            .await?;

        let (status, body) = read_json(resp, path).await?;
        check_http_status(Exchange::Bybit, status, &body)?;

        let ret_code = body["retCode"]
            .as_i64()
            .ok_or_else(|| Error::data(path, format!("missing retCode (HTTP {status})")))?;
        if ret_code != 0 {
            let msg = body["retMsg"].as_str().unwrap_or_default().to_string();
            if AUTH_RET_CODES.contains(&ret_code) {
                return Err(Error::auth(Exchange::Bybit, format!("{ret_code}: {msg}")));
            }
            return Err(Error::Exchange {
                exchange: Exchange::Bybit,
                code: ret_code.to_string(),
                message: msg,
            });
        }

        Ok(body)
    }

    /// GET /v5/position/list, following `nextPageCursor` until exhausted.
    #[instrument(skip(self), name = "bybit::get_positions")]
    pub async fn get_positions(&self) -> Result<Vec<PositionRecord>> {
        let mut positions = Vec::new();
        let mut cursor = String::new();

        for _ in 0..MAX_PAGES {
            let mut query = format!("category=linear&settleCoin=USDT&limit={PAGE_LIMIT}");
            if !cursor.is_empty() {
                query.push_str("&cursor=");
                query.push_str(&cursor);
            }

            let body = self.signed_get("/v5/position/list", &query).await?;
            positions.extend(parse_positions(&body)?);

            cursor = body["result"]["nextPageCursor"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            if cursor.is_empty() {
                debug!(count = positions.len(), "open positions retrieved");
                return Ok(positions);
            }
        }

        warn!(pages = MAX_PAGES, "position pagination did not terminate, using partial list");
        Ok(positions)
    }

    /// GET /v5/account/wallet-balance for the unified account.
    #[instrument(skip(self), name = "bybit::get_balance")]
    pub async fn get_balance(&self) -> Result<AccountBalance> {
        let body = self
            .signed_get("/v5/account/wallet-balance", "accountType=UNIFIED")
            .await?;
        let account = body["result"]["list"]
            .as_array()
            .and_then(|l| l.first())
            .ok_or_else(|| Error::data("bybit wallet-balance", "empty account list"))?;

        Ok(AccountBalance {
            wallet_balance: parse_f64_or_zero(&account["totalWalletBalance"], "totalWalletBalance")?,
            margin_balance: parse_f64_or_zero(&account["totalEquity"], "totalEquity")?,
            unrealized_pnl: parse_f64_or_zero(&account["totalPerpUPL"], "totalPerpUPL")?,
        })
    }
}

/// Bybit's `positionValue` is entry-based and excludes unrealized PnL, so
/// exposure is marked to market here: longs gain the PnL, shorts lose it.
fn parse_positions(body: &serde_json::Value) -> Result<Vec<PositionRecord>> {
    let entries = body["result"]["list"]
        .as_array()
        .ok_or_else(|| Error::data("bybit position list", "result.list is not an array"))?;

    let mut out = Vec::new();
    for entry in entries {
        let Some(symbol) = entry["symbol"].as_str() else {
            warn!("skipping position entry without symbol");
            continue;
        };
        let size = parse_f64(&entry["size"], "size")?;
        let side = match entry["side"].as_str() {
            Some("Buy") => Side::Long,
            Some("Sell") => Side::Short,
            _ => continue,
        };
        if size == 0.0 {
            continue;
        }

        let value = parse_f64(&entry["positionValue"], "positionValue")?.abs();
        let pnl = parse_f64_or_zero(&entry["unrealisedPnl"], "unrealisedPnl")?;
        let exposure = match side {
            Side::Long => value + pnl,
            Side::Short => value - pnl,
        };
        out.push(PositionRecord::new(symbol, side, exposure.max(0.0), pnl));
    }
    Ok(out)
}

impl std::fmt::Debug for BybitClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BybitClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ok(list: serde_json::Value, cursor: &str) -> serde_json::Value {
        json!({
            "retCode": 0,
            "retMsg": "OK",
            "result": { "list": list, "nextPageCursor": cursor, "category": "linear" }
        })
    }

    #[test]
    fn signature_is_deterministic() {
        let client = BybitClient::new("test-key", "test-secret").unwrap();
        assert_eq!(
            client.signature(1_700_000_000_000, "category=linear&settleCoin=USDT&limit=200"),
            "f57d5dc8f406f0597dcfa23566d09643392e1aaf260400651f315aea86318a72"
        );
    }

    #[test]
    fn exposure_includes_unrealized_pnl() {
        let body = ok(
            json!([
                {"symbol": "ETHUSDT", "side": "Buy", "size": "1", "positionValue": "3000", "unrealisedPnl": "150"},
                {"symbol": "SOLUSDT", "side": "Sell", "size": "10", "positionValue": "1500", "unrealisedPnl": "-50"},
                {"symbol": "XRPUSDT", "side": "", "size": "0", "positionValue": "0", "unrealisedPnl": ""}
            ]),
            "",
        );
        let positions = parse_positions(&body).unwrap();
        assert_eq!(positions.len(), 2);
        assert_eq!(positions[0].notional, 3150.0);
        assert_eq!(positions[1].side, Side::Short);
        assert_eq!(positions[1].notional, 1550.0);
    }

    #[tokio::test]
    async fn follows_pagination_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v5/position/list"))
            .and(query_param_is_missing("cursor"))
            .and(header("X-BAPI-API-KEY", "k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok(
                json!([{"symbol": "BTCUSDT", "side": "Buy", "size": "0.1", "positionValue": "6000", "unrealisedPnl": "0"}]),
                "page2",
            )))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v5/position/list"))
            .and(query_param("cursor", "page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok(
                json!([{"symbol": "ETHUSDT", "side": "Sell", "size": "1", "positionValue": "3000", "unrealisedPnl": "0"}]),
                "",
            )))
            .expect(1)
            .mount(&server)
            .await;

        let client = BybitClient::new("k", "s").unwrap().with_base_url(server.uri());
        let positions = client.get_positions().await.unwrap();
        let symbols: Vec<&str> = positions.iter().map(|p| p.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[tokio::test]
    async fn ret_code_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v5/position/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "retCode": 10003, "retMsg": "API key is invalid.", "result": {}
            })))
            .mount(&server)
            .await;

        let client = BybitClient::new("k", "s").unwrap().with_base_url(server.uri());
        let err = client.get_positions().await.unwrap_err();
        assert!(matches!(err, Error::Auth { exchange: Exchange::Bybit, .. }));
    }

    #[tokio::test]
    async fn other_ret_codes_are_exchange_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v5/account/wallet-balance"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "retCode": 10016, "retMsg": "Server error", "result": {}
            })))
            .mount(&server)
            .await;

        let client = BybitClient::new("k", "s").unwrap().with_base_url(server.uri());
        match client.get_balance().await.unwrap_err() {
            Error::Exchange { code, .. } => assert_eq!(code, "10016"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn reads_unified_wallet_balance() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v5/account/wallet-balance"))
            .and(query_param("accountType", "UNIFIED"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "retCode": 0,
                "retMsg": "OK",
                "result": { "list": [{
                    "totalEquity": "5200.5",
                    "totalWalletBalance": "5000",
                    "totalPerpUPL": "200.5"
                }]}
            })))
            .mount(&server)
            .await;

        let client = BybitClient::new("k", "s").unwrap().with_base_url(server.uri());
        let balance = client.get_balance().await.unwrap();
        assert_eq!(balance.margin_balance, 5200.5);
        assert_eq!(balance.unrealized_pnl, 200.5);
    }
}
