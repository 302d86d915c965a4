// =============================================================================
// Report Formatter — console text and Telegram Markdown renderings
// =============================================================================
//
// Both renderers emit the same sections in the same order:
//
//   header → account balance (optional) → overall notional → ratio → breakdown
//
// Output is deterministic for a given input; no ANSI escapes.
// =============================================================================

use std::fmt::Write as _;

use crate::aggregator::{AggregationRules, NetPosition, Ratio, Summary};
use crate::types::{AccountBalance, Exchange};

const RULE_WIDE: usize = 60;
const RULE_NARROW: usize = 40;
const CONSOLE_SYMBOL_WIDTH: usize = 15;
const TELEGRAM_SYMBOL_WIDTH: usize = 12;

/// Everything a renderer needs for one exchange.
#[derive(Debug, Clone, Copy)]
pub struct ReportContext<'a> {
    pub exchange: Exchange,
    pub summary: &'a Summary,
    pub rules: &'a AggregationRules,
    pub balance: Option<&'a AccountBalance>,
}

// ---------------------------------------------------------------------------
// Number formatting
// ---------------------------------------------------------------------------

/// `1234567.891` → `1,234,567.89`.
pub fn format_amount(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let fixed = format!("{:.2}", value.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    // `-0.00` reads badly; only keep the sign when something survives rounding.
    let negative = value < 0.0 && fixed.chars().any(|c| c.is_ascii_digit() && c != '0');
    if negative {
        format!("-{grouped}.{frac_part}")
    } else {
        format!("{grouped}.{frac_part}")
    }
}

/// `-1234.5` → `-$1,234.50`.
pub fn format_usd(value: f64) -> String {
    let amount = format_amount(value);
    match amount.strip_prefix('-') {
        Some(abs) => format!("-${abs}"),
        None => format!("${amount}"),
    }
}

fn ratio_line(ratio: &Ratio) -> String {
    match ratio {
        Ratio::Finite(v) => format!("{v:.4}"),
        Ratio::Infinite => "∞ (no short positions)".to_string(),
        Ratio::Undefined => "N/A (no positions)".to_string(),
    }
}

/// Left-aligned, truncated to `width` chars.
fn fit_symbol(symbol: &str, width: usize) -> String {
    let truncated: String = symbol.chars().take(width).collect();
    format!("{truncated:<width$}")
}

fn weight_note(position: &NetPosition) -> String {
    if (position.weight - 1.0).abs() > f64::EPSILON {
        format!(" (w={:.2})", position.weight)
    } else {
        String::new()
    }
}

fn excluded_list(rules: &AggregationRules) -> String {
    let list: Vec<&str> = rules.excluded().collect();
    if list.is_empty() {
        "none".to_string()
    } else {
        list.join(", ")
    }
}

fn weight_list(rules: &AggregationRules) -> String {
    if rules.weights().is_empty() {
        return "none".to_string();
    }
    rules
        .weights()
        .iter()
        .map(|r| format!("{}={}", r.prefix, r.weight))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Escape characters that legacy Telegram Markdown treats as markup.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '_' | '*' | '`' | '[') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

// ---------------------------------------------------------------------------
// Console
// ---------------------------------------------------------------------------

fn section(out: &mut String, title: &str) {
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", "-".repeat(RULE_NARROW));
    let _ = writeln!(out, "{title}");
    let _ = writeln!(out, "{}", "-".repeat(RULE_NARROW));
}

fn console_row(out: &mut String, p: &NetPosition) {
    let _ = writeln!(
        out,
        "  {} {:<5} {:>14} | PNL: {:>11}{}",
        fit_symbol(&p.symbol, CONSOLE_SYMBOL_WIDTH),
        p.side.to_string(),
        format_usd(p.notional),
        format_usd(p.unrealized_pnl),
        weight_note(p),
    );
}

pub fn render_console(ctx: &ReportContext<'_>) -> String {
    let s = ctx.summary;
    let mut out = String::new();

    let _ = writeln!(out, "{}", "=".repeat(RULE_WIDE));
    let _ = writeln!(out, "PERPETUAL POSITIONS LONG/SHORT RATIO ANALYSIS");
    let _ = writeln!(out, "{}", "=".repeat(RULE_WIDE));
    let _ = writeln!(out, "Exchange: {}", ctx.exchange.label());
    let _ = writeln!(out, "Total positions analyzed: {}", s.record_count);
    let _ = writeln!(out, "Excluded tickers: {}", excluded_list(ctx.rules));
    let _ = writeln!(out, "Weight factors: {}", weight_list(ctx.rules));

    if let Some(b) = ctx.balance {
        section(&mut out, "ACCOUNT BALANCE");
        let _ = writeln!(out, "Wallet Balance:        {}", format_usd(b.wallet_balance));
        let _ = writeln!(out, "Margin Balance:        {}", format_usd(b.margin_balance));
        let _ = writeln!(out, "Unrealized PNL:        {}", format_usd(b.unrealized_pnl));
    }

    section(&mut out, "OVERALL NOTIONAL VALUES");
    let _ = writeln!(out, "Raw Long Total:        {}", format_usd(s.raw_long_total));
    let _ = writeln!(out, "Raw Short Total:       {}", format_usd(s.raw_short_total));
    let _ = writeln!(out, "Effective Long Total:  {}", format_usd(s.effective_long_total));
    let _ = writeln!(out, "Effective Short Total: {}", format_usd(s.effective_short_total));
    let _ = writeln!(out, "Overall PNL:           {}", format_usd(s.overall_pnl));

    section(&mut out, "LONG/SHORT RATIO");
    let _ = writeln!(out, "Long/Short Ratio: {}", ratio_line(&s.ratio));

    section(&mut out, "POSITION BREAKDOWN BY SYMBOL");
    let longs: Vec<&NetPosition> = s.longs().collect();
    let shorts: Vec<&NetPosition> = s.shorts().collect();

    if longs.is_empty() && shorts.is_empty() {
        let _ = writeln!(out, "No open positions.");
    }
    if !longs.is_empty() {
        let _ = writeln!(out, "LONG POSITIONS:");
        for p in &longs {
            console_row(&mut out, p);
        }
    }
    if !shorts.is_empty() {
        if !longs.is_empty() {
            let _ = writeln!(out);
        }
        let _ = writeln!(out, "SHORT POSITIONS:");
        for p in &shorts {
            console_row(&mut out, p);
        }
    }

    out
}

// ---------------------------------------------------------------------------
// Telegram (legacy Markdown parse mode)
// ---------------------------------------------------------------------------

fn telegram_row(out: &mut String, p: &NetPosition) {
    let _ = writeln!(
        out,
        "`{}` {:>12} | PNL: {:>10}{}",
        fit_symbol(&p.symbol, TELEGRAM_SYMBOL_WIDTH),
        format_usd(p.notional),
        format_usd(p.unrealized_pnl),
        weight_note(p),
    );
}

pub fn render_telegram(ctx: &ReportContext<'_>) -> String {
    let s = ctx.summary;
    let mut out = String::new();

    let _ = writeln!(out, "*{} - Perpetual Positions Analysis*", ctx.exchange.label());
    let _ = writeln!(out, "Positions: {}", s.record_count);
    let _ = writeln!(out, "Excluded: {}", excluded_list(ctx.rules));
    let _ = writeln!(out, "Weights: {}", weight_list(ctx.rules));
    let _ = writeln!(out);

    if let Some(b) = ctx.balance {
        let _ = writeln!(out, "*Account Balance:*");
        let _ = writeln!(out, "Wallet Balance: {}", format_usd(b.wallet_balance));
        let _ = writeln!(out, "*Margin Balance: {}*", format_usd(b.margin_balance));
        let _ = writeln!(out, "*Unrealized PNL: {}*", format_usd(b.unrealized_pnl));
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "*Overall Stats:*");
    let _ = writeln!(out, "Raw Long: {}", format_usd(s.raw_long_total));
    let _ = writeln!(out, "Raw Short: {}", format_usd(s.raw_short_total));
    let _ = writeln!(out, "Effective Long: {}", format_usd(s.effective_long_total));
    let _ = writeln!(out, "Effective Short: {}", format_usd(s.effective_short_total));
    let _ = writeln!(out, "Overall PNL: {}", format_usd(s.overall_pnl));
    let _ = writeln!(out, "*Long/Short Ratio: {}*", s.ratio);
    let _ = writeln!(out);

    let longs: Vec<&NetPosition> = s.longs().collect();
    let shorts: Vec<&NetPosition> = s.shorts().collect();

    if !longs.is_empty() {
        let _ = writeln!(out, "*Long Positions:*");
        for p in &longs {
            telegram_row(&mut out, p);
        }
        let _ = writeln!(out);
    }
    if !shorts.is_empty() {
        let _ = writeln!(out, "*Short Positions:*");
        for p in &shorts {
            telegram_row(&mut out, p);
        }
    }

    out.trim_end().to_string()
}

/// Chat message sent when a scheduled run for `exchange` fails.
pub fn render_error(exchange: Exchange, error: &dyn std::fmt::Display) -> String {
    format!(
        "*{} - Error*\n\nFailed to fetch positions: {}",
        exchange.label(),
        escape_markdown(&error.to_string())
    )
}
