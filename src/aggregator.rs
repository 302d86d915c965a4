// =============================================================================
// Position Aggregator — netting, weighting and the long/short ratio
// =============================================================================
//
// Pure function of its inputs:
//
//   1. drop excluded symbols
//   2. net signed notional per symbol
//   3. classify LONG / SHORT / FLAT (FLAT is dropped)
//   4. apply the per-symbol weight
//   5. accumulate raw and effective totals per side
//   6. ratio = effective long / effective short (total, never divides by zero)
//   7. sort: LONG before SHORT, effective notional descending within a side
// =============================================================================

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::types::{normalize_symbol, PositionRecord, Side};

/// Net signed notional is rounded to this many decimals before the FLAT test.
const FLAT_DECIMALS: i32 = 8;

fn round_dp(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Symbols starting with `prefix` get `weight` applied to their notional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightRule {
    pub prefix: String,
    pub weight: f64,
}

/// Exclusion set and weight table applied by [`aggregate`].
#[derive(Debug, Clone, Default)]
pub struct AggregationRules {
    excluded: BTreeSet<String>,
    weights: Vec<WeightRule>,
}

impl AggregationRules {
    pub fn new<I, S>(excluded: I, weights: Vec<WeightRule>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let weights = weights
            .into_iter()
            .map(|r| WeightRule {
                prefix: normalize_symbol(&r.prefix),
                weight: r.weight,
            })
            .collect();

        Self {
            excluded: excluded
                .into_iter()
                .map(|s| normalize_symbol(s.as_ref()))
                .collect(),
            weights,
        }
    }

    pub fn is_excluded(&self, symbol: &str) -> bool {
        self.excluded.contains(&normalize_symbol(symbol))
    }

    /// First matching prefix wins; anything unmatched weighs 1.0.
    pub fn weight_for(&self, symbol: &str) -> f64 {
        let symbol = normalize_symbol(symbol);
        self.weights
            .iter()
            .find(|r| symbol.starts_with(&r.prefix))
            .map(|r| r.weight)
            .unwrap_or(1.0)
    }

    pub fn excluded(&self) -> impl Iterator<Item = &str> {
        self.excluded.iter().map(String::as_str)
    }

    pub fn weights(&self) -> &[WeightRule] {
        &self.weights
    }
}

// ---------------------------------------------------------------------------
// Output model
// ---------------------------------------------------------------------------

/// Long/short ratio with its two degenerate cases made explicit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Ratio {
    Finite(f64),
    /// Longs but no shorts.
    Infinite,
    /// Neither longs nor shorts.
    Undefined,
}

impl Ratio {
    pub fn from_totals(long: f64, short: f64) -> Self {
        if short > 0.0 {
            Self::Finite(long / short)
        } else if long > 0.0 {
            Self::Infinite
        } else {
            Self::Undefined
        }
    }
}

impl std::fmt::Display for Ratio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Finite(v) => write!(f, "{v:.4}"),
            Self::Infinite => write!(f, "∞"),
            Self::Undefined => write!(f, "N/A"),
        }
    }
}

/// Residual exposure in one symbol after netting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetPosition {
    pub symbol: String,
    pub side: Side,
    /// |net signed notional|, unweighted.
    pub notional: f64,
    pub weight: f64,
    /// `notional * weight`.
    pub effective_notional: f64,
    pub unrealized_pnl: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Records handed to the aggregator, before exclusion.
    pub record_count: usize,
    pub excluded_count: usize,
    pub raw_long_total: f64,
    pub raw_short_total: f64,
    pub effective_long_total: f64,
    pub effective_short_total: f64,
    pub ratio: Ratio,
    /// Unrealized PnL over every non-excluded record, FLAT symbols included.
    pub overall_pnl: f64,
    /// LONG entries first, then SHORT; effective notional descending.
    pub positions: Vec<NetPosition>,
}

impl Summary {
    pub fn longs(&self) -> impl Iterator<Item = &NetPosition> {
        self.positions.iter().filter(|p| p.side == Side::Long)
    }

    pub fn shorts(&self) -> impl Iterator<Item = &NetPosition> {
        self.positions.iter().filter(|p| p.side == Side::Short)
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SymbolNet {
    signed_notional: f64,
    pnl: f64,
}

pub fn aggregate(records: &[PositionRecord], rules: &AggregationRules) -> Summary {
    // BTreeMap keeps symbols alphabetical, which is the tie-break order below.
    let mut by_symbol: BTreeMap<String, SymbolNet> = BTreeMap::new();
    let mut excluded_count = 0;

    for record in records {
        if rules.is_excluded(&record.symbol) {
            excluded_count += 1;
            continue;
        }
        let entry = by_symbol.entry(normalize_symbol(&record.symbol)).or_default();
        entry.signed_notional += record.signed_notional();
        entry.pnl += record.unrealized_pnl;
    }

    let mut raw_long_total = 0.0;
    let mut raw_short_total = 0.0;
    let mut effective_long_total = 0.0;
    let mut effective_short_total = 0.0;
    let mut overall_pnl = 0.0;
    let mut positions = Vec::with_capacity(by_symbol.len());

    for (symbol, net) in by_symbol {
        overall_pnl += net.pnl;

        let rounded = round_dp(net.signed_notional, FLAT_DECIMALS);
        let side = if rounded > 0.0 {
            Side::Long
        } else if rounded < 0.0 {
            Side::Short
        } else {
            continue;
        };

        let notional = rounded.abs();
        let weight = rules.weight_for(&symbol);
        let effective_notional = notional * weight;

        match side {
            Side::Long => {
                raw_long_total += notional;
                effective_long_total += effective_notional;
            }
            Side::Short => {
                raw_short_total += notional;
                effective_short_total += effective_notional;
            }
        }

        positions.push(NetPosition {
            symbol,
            side,
            notional,
            weight,
            effective_notional,
            unrealized_pnl: net.pnl,
        });
    }

    // Stable: equal keys keep alphabetical order.
    positions.sort_by(|a, b| {
        let side_rank = |p: &NetPosition| match p.side {
            Side::Long => 0,
            Side::Short => 1,
        };
        side_rank(a).cmp(&side_rank(b)).then_with(|| {
            b.effective_notional
                .partial_cmp(&a.effective_notional)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    });

    Summary {
        record_count: records.len(),
        excluded_count,
        raw_long_total,
        raw_short_total,
        effective_long_total,
        effective_short_total,
        ratio: Ratio::from_totals(effective_long_total, effective_short_total),
        overall_pnl,
        positions,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> AggregationRules {
        AggregationRules::new(
            ["PAXGUSDT", "BTCDOM/USDT:USDT"],
            vec![WeightRule {
                prefix: "BTC".into(),
                weight: 0.5,
            }],
        )
    }

    fn long(symbol: &str, notional: f64) -> PositionRecord {
        PositionRecord::new(symbol, Side::Long, notional, 0.0)
    }

    fn short(symbol: &str, notional: f64) -> PositionRecord {
        PositionRecord::new(symbol, Side::Short, notional, 0.0)
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn empty_input_is_undefined_not_an_error() {
        let s = aggregate(&[], &rules());
        assert_eq!(s.ratio, Ratio::Undefined);
        assert_eq!(s.raw_long_total, 0.0);
        assert_eq!(s.effective_short_total, 0.0);
        assert!(s.positions.is_empty());
    }

    #[test]
    fn all_excluded_input_is_undefined() {
        let s = aggregate(&[long("PAXGUSDT", 50_000.0), short("BTCDOMUSDT", 1.0)], &rules());
        assert_eq!(s.ratio, Ratio::Undefined);
        assert_eq!(s.excluded_count, 2);
        assert_eq!(s.record_count, 2);
        assert!(s.positions.is_empty());
    }

    #[test]
    fn excluded_symbols_contribute_nothing() {
        let base = vec![long("ETHUSDT", 1_000.0), short("SOLUSDT", 500.0)];
        let mut with_excluded = base.clone();
        with_excluded.push(long("PAXG/USDT:USDT", 1_000_000.0));
        with_excluded.push(short("BTCDOMUSDT", 750_000.0));

        let a = aggregate(&base, &rules());
        let b = aggregate(&with_excluded, &rules());
        assert_eq!(a.positions, b.positions);
        assert_eq!(a.raw_long_total, b.raw_long_total);
        assert_eq!(a.effective_short_total, b.effective_short_total);
        assert!(b.positions.iter().all(|p| !p.symbol.starts_with("PAXG")));
    }

    #[test]
    fn btc_long_is_half_weighted() {
        let s = aggregate(&[long("BTCUSDT", 10_000.0)], &rules());
        assert!(approx(s.raw_long_total, 10_000.0));
        assert!(approx(s.effective_long_total, 5_000.0));
        assert_eq!(s.positions[0].weight, 0.5);
        assert_eq!(s.ratio, Ratio::Infinite);
    }

    #[test]
    fn splitting_a_position_nets_to_the_same_entry() {
        let whole = aggregate(&[long("ETHUSDT", 3_000.3)], &rules());
        let split = aggregate(&[long("ETHUSDT", 1_000.1), long("ETHUSDT", 2_000.2)], &rules());
        assert_eq!(split.positions.len(), 1);
        assert!(approx(whole.positions[0].notional, split.positions[0].notional));
        assert_eq!(whole.positions[0].side, split.positions[0].side);
    }

    #[test]
    fn opposite_sides_net_to_single_entry() {
        let s = aggregate(&[long("ETHUSDT", 10_000.0), short("ETHUSDT", 5_000.0)], &rules());
        assert_eq!(s.positions.len(), 1);
        assert_eq!(s.positions[0].side, Side::Long);
        assert!(approx(s.positions[0].notional, 5_000.0));
        assert_eq!(s.raw_short_total, 0.0);
    }

    #[test]
    fn flat_symbol_is_dropped_even_with_float_residue() {
        let s = aggregate(
            &[long("ETHUSDT", 0.1 + 0.2), short("ETHUSDT", 0.3), short("SOLUSDT", 10.0)],
            &rules(),
        );
        assert_eq!(s.positions.len(), 1);
        assert_eq!(s.positions[0].symbol, "SOLUSDT");
        assert_eq!(s.raw_long_total, 0.0);
        assert_eq!(s.ratio, Ratio::Finite(0.0));
    }

    #[test]
    fn flat_symbol_pnl_still_counts_overall() {
        let s = aggregate(
            &[
                PositionRecord::new("ETHUSDT", Side::Long, 100.0, 7.5),
                PositionRecord::new("ETHUSDT", Side::Short, 100.0, -2.5),
            ],
            &rules(),
        );
        assert!(s.positions.is_empty());
        assert!(approx(s.overall_pnl, 5.0));
    }

    #[test]
    fn sort_is_long_first_then_descending() {
        let s = aggregate(
            &[short("CCCUSDT", 5_000.0), long("AAAUSDT", 10_000.0), long("BBBUSDT", 20_000.0)],
            &rules(),
        );
        let order: Vec<&str> = s.positions.iter().map(|p| p.symbol.as_str()).collect();
        assert_eq!(order, vec!["BBBUSDT", "AAAUSDT", "CCCUSDT"]);
    }

    #[test]
    fn sort_uses_effective_notional_and_alphabetical_ties() {
        // BTC 30k long weighs 15k effective, below ETH's 20k.
        let s = aggregate(
            &[
                long("BTCUSDT", 30_000.0),
                long("ETHUSDT", 20_000.0),
                short("XRPUSDT", 1_000.0),
                short("ADAUSDT", 1_000.0),
            ],
            &rules(),
        );
        let order: Vec<&str> = s.positions.iter().map(|p| p.symbol.as_str()).collect();
        assert_eq!(order, vec!["ETHUSDT", "BTCUSDT", "ADAUSDT", "XRPUSDT"]);
    }

    #[test]
    fn ratio_matches_worked_example() {
        // Raw long 125k with a 20k BTC long (10k effective) → effective 115k.
        let s = aggregate(
            &[
                long("BTCUSDT", 20_000.0),
                long("ETHUSDT", 60_000.0),
                long("SOLUSDT", 45_000.0),
                short("DOGEUSDT", 50_000.0),
                short("XRPUSDT", 35_000.0),
            ],
            &rules(),
        );
        assert!(approx(s.raw_long_total, 125_000.0));
        assert!(approx(s.effective_long_total, 115_000.0));
        assert!(approx(s.raw_short_total, 85_000.0));
        assert!(approx(s.effective_short_total, 85_000.0));
        assert_eq!(s.ratio.to_string(), "1.3529");
    }

    #[test]
    fn zero_short_with_longs_is_infinite() {
        let s = aggregate(&[long("ETHUSDT", 1.0)], &rules());
        assert_eq!(s.ratio, Ratio::Infinite);
        assert_eq!(s.ratio.to_string(), "∞");
    }

    #[test]
    fn totals_are_never_negative() {
        let s = aggregate(
            &[short("ETHUSDT", 10.0), long("ETHUSDT", 3.0), short("BTCUSDT", 8.0)],
            &rules(),
        );
        assert!(s.effective_long_total >= 0.0);
        assert!(s.effective_short_total >= 0.0);
        assert!(s.positions.iter().all(|p| p.notional > 0.0 && p.effective_notional >= 0.0));
    }

    #[test]
    fn unknown_symbols_weigh_one_and_first_rule_wins() {
        let r = AggregationRules::new(
            Vec::<String>::new(),
            vec![
                WeightRule { prefix: "BTC".into(), weight: 0.5 },
                WeightRule { prefix: "B".into(), weight: 0.1 },
            ],
        );
        assert_eq!(r.weight_for("BTCUSDT"), 0.5);
        assert_eq!(r.weight_for("BNBUSDT"), 0.1);
        assert_eq!(r.weight_for("ETHUSDT"), 1.0);
    }
}
