// =============================================================================
// Shared types used across the perp-ratio pipeline
// =============================================================================

use serde::{Deserialize, Serialize};

/// Supported perpetual-futures venues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    #[serde(alias = "bn")]
    Binance,
    #[serde(alias = "bb")]
    Bybit,
    #[serde(alias = "bg")]
    Bitget,
}

impl Exchange {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::Bybit => "bybit",
            Self::Bitget => "bitget",
        }
    }

    /// Upper-case label used in report headers.
    pub fn label(&self) -> String {
        self.as_str().to_uppercase()
    }
}

impl Default for Exchange {
    fn default() -> Self {
        Self::Binance
    }
}

impl std::fmt::Display for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Exchange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "binance" | "bn" => Ok(Self::Binance),
            "bybit" | "bb" => Ok(Self::Bybit),
            "bitget" | "bg" => Ok(Self::Bitget),
            other => Err(format!(
                "unsupported exchange '{other}' (expected binance|bybit|bitget or bn|bb|bg)"
            )),
        }
    }
}

/// Direction of a single open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn sign(&self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// One open perpetual position as reported by an exchange.
///
/// `notional` is always the absolute exposure in quote currency; direction
/// lives in `side`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub symbol: String,
    pub side: Side,
    pub notional: f64,
    pub quote: String,
    #[serde(default)]
    pub unrealized_pnl: f64,
}

impl PositionRecord {
    /// Build a record from a raw exchange symbol, normalising it on the way.
    pub fn new(raw_symbol: &str, side: Side, notional: f64, unrealized_pnl: f64) -> Self {
        let symbol = normalize_symbol(raw_symbol);
        let quote = quote_currency(&symbol).to_string();
        Self {
            symbol,
            side,
            notional: notional.abs(),
            quote,
            unrealized_pnl,
        }
    }

    /// Positive for longs, negative for shorts.
    pub fn signed_notional(&self) -> f64 {
        self.side.sign() * self.notional
    }
}

/// Futures account balance snapshot (all values in USD-equivalent units).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    #[serde(default)]
    pub wallet_balance: f64,
    #[serde(default)]
    pub margin_balance: f64,
    #[serde(default)]
    pub unrealized_pnl: f64,
}

/// Canonical symbol form: `PAXG/USDT:USDT`, `PAXG-USDT` and `paxgusdt` all
/// become `PAXGUSDT`.
pub fn normalize_symbol(raw: &str) -> String {
    let base = raw.split(':').next().unwrap_or(raw);
    base.chars()
        .filter(|c| !matches!(c, '/' | '-' | '_') && !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

/// Quote currency of a normalised symbol. USDT and USDC are both treated as
/// $1 units downstream.
pub fn quote_currency(symbol: &str) -> &'static str {
    if symbol.ends_with("USDC") {
        "USDC"
    } else {
        "USDT"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_parses_names_and_aliases() {
        assert_eq!("binance".parse::<Exchange>().unwrap(), Exchange::Binance);
        assert_eq!("BB".parse::<Exchange>().unwrap(), Exchange::Bybit);
        assert_eq!(" bg ".parse::<Exchange>().unwrap(), Exchange::Bitget);
        assert!("kraken".parse::<Exchange>().is_err());
    }

    #[test]
    fn exchange_deserialises_aliases() {
        let list: Vec<Exchange> = serde_json::from_str(r#"["bn", "bybit"]"#).unwrap();
        assert_eq!(list, vec![Exchange::Binance, Exchange::Bybit]);
    }

    #[test]
    fn normalize_strips_separators_and_settlement() {
        assert_eq!(normalize_symbol("PAXG/USDT:USDT"), "PAXGUSDT");
        assert_eq!(normalize_symbol("btc-usdt"), "BTCUSDT");
        assert_eq!(normalize_symbol("ETHUSDC"), "ETHUSDC");
    }

    #[test]
    fn record_uses_absolute_notional_and_derives_quote() {
        let r = PositionRecord::new("ETH/USDC:USDC", Side::Short, -2500.0, 12.0);
        assert_eq!(r.symbol, "ETHUSDC");
        assert_eq!(r.quote, "USDC");
        assert!((r.notional - 2500.0).abs() < f64::EPSILON);
        assert!((r.signed_notional() + 2500.0).abs() < f64::EPSILON);
    }
}
