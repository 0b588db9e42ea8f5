//! System and user prompt construction.
//!
//! The system prompt encodes the fixed trading policy with the agent's
//! numeric limits substituted in; the user prompt carries the cycle's market
//! and account data in a deterministic order.

use std::collections::HashMap;

use chrono::Utc;
use tracing::warn;

use crate::domain::{CandidateCoin, PositionInfo};
use crate::indicators;
use crate::market::format_snapshot;

use super::context::{DecisionContext, TradingLimits};

/// A named system-prompt template.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub name: String,
    pub content: String,
}

/// Registry of named system-prompt templates.
///
/// Lookup failure falls back to the built-in template with a warning; it
/// never fails the cycle.
#[derive(Debug, Default)]
pub struct PromptRegistry {
    templates: HashMap<String, PromptTemplate>,
}

impl PromptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, template: PromptTemplate) {
        self.templates.insert(template.name.clone(), template);
    }

    pub fn get(&self, name: &str) -> Option<&PromptTemplate> {
        self.templates.get(name)
    }

    /// Resolve the system prompt: a non-empty named template wins, the
    /// built-in policy prompt is the fallback.
    pub fn system_prompt(&self, name: Option<&str>, equity: f64, limits: &TradingLimits) -> String {
        let name = name.filter(|n| !n.is_empty()).unwrap_or("default");
        match self.get(name) {
            Some(t) if !t.content.is_empty() => return t.content.clone(),
            _ if name != "default" => {
                warn!(template = name, "prompt template not found, using built-in")
            }
            _ => {}
        }
        builtin_system_prompt(equity, limits)
    }
}

/// Build the `(system, user)` message pair for one cycle.
pub fn build_prompts(registry: &PromptRegistry, ctx: &DecisionContext) -> (String, String) {
    let system = registry.system_prompt(
        ctx.template.as_deref(),
        ctx.account.total_equity,
        &ctx.limits,
    );
    let user = build_user_prompt(ctx);
    (system, user)
}

fn builtin_system_prompt(equity: f64, limits: &TradingLimits) -> String {
    let mut s = String::new();

    s.push_str("You are a professional cryptocurrency trading AI operating autonomously on a perpetual-futures exchange.\n\n");
    s.push_str("# Objective\n\n");
    s.push_str("Maximize the Sharpe ratio (risk-adjusted return), not trade count.\n");
    s.push_str("High-quality setups, stable returns and controlled drawdown raise Sharpe; overtrading, churn and premature exits destroy it.\n");
    s.push_str("The system scans on a fixed cadence, but most cycles should end in `wait` or `hold`.\n\n");

    s.push_str("# Hard constraints\n\n");
    s.push_str("1. Risk/reward ratio must be >= 3.0 (risk 1 to make 3 or better).\n");
    s.push_str("2. At most 3 concurrent positions.\n");

    if limits.max_position_size_usd > 0.0 {
        if limits.min_position_size_usd > 0.0 {
            s.push_str(&format!(
                "3. Every position must be between {:.0} and {:.0} USDT. Orders outside this band are rejected automatically.\n",
                limits.min_position_size_usd, limits.max_position_size_usd
            ));
        } else {
            s.push_str(&format!(
                "3. No position may exceed {:.0} USDT. Larger orders are rejected automatically.\n",
                limits.max_position_size_usd
            ));
        }
        s.push_str(&format!(
            "   Leverage caps: altcoins up to {}x, BTC/ETH up to {}x.\n",
            limits.altcoin_leverage, limits.btc_eth_leverage
        ));
    } else {
        s.push_str(&format!(
            "3. Position sizing: altcoins {:.0}-{:.0} USDT ({}x leverage cap) | BTC/ETH {:.0}-{:.0} USDT ({}x leverage cap).\n",
            equity * 0.8,
            equity * limits.size_multiple("ALTUSDT"),
            limits.altcoin_leverage,
            equity * 5.0,
            equity * limits.size_multiple("BTCUSDT"),
            limits.btc_eth_leverage
        ));
        if limits.min_position_size_usd > 0.0 {
            s.push_str(&format!(
                "   Minimum position size: {:.0} USDT.\n",
                limits.min_position_size_usd
            ));
        }
    }
    s.push_str(&format!(
        "4. Total margin usage must stay at or below {:.0}%.\n\n",
        limits.max_margin_usage_pct
    ));

    s.push_str("# Long/short symmetry\n\n");
    s.push_str("Shorting a downtrend pays exactly like longing an uptrend. Uptrend: long. Downtrend: short. Chop: wait. Do not carry a long-only bias.\n\n");

    s.push_str("# Entry standard\n\n");
    s.push_str("Open only on strong multi-factor signals (price + volume + OI + indicator + pattern agreement) with confidence >= 75. You have the full 3m and 4h series, EMA20/MACD/RSI series, volume and OI series, funding, and pattern detections. Analyze them however you see fit.\n\n");

    s.push_str("# Sharpe feedback\n\n");
    s.push_str("Each cycle you receive your rolling Sharpe ratio.\n");
    s.push_str("Below -0.5: stop trading and observe for several cycles, then re-examine frequency, holding time and signal quality.\n");
    s.push_str("-0.5 to 0: only take confidence >80 setups, at most one new entry per hour.\n");
    s.push_str("0 to 0.7: maintain the current approach.\n");
    s.push_str("Above 0.7: position sizes may grow moderately.\n\n");

    s.push_str("# Output format (critical)\n\n");
    s.push_str("First a short chain-of-thought analysis in plain text (keep it under ~200 words).\n");
    s.push_str("Then a single valid JSON array, started with `[` and ended with `]`, at the very end of the response. The JSON array is mandatory even when every decision is a wait.\n\n");
    s.push_str("Example:\n\n");
    s.push_str("```json\n[\n");
    s.push_str(&format!(
        "  {{\"symbol\": \"BTCUSDT\", \"action\": \"open_short\", \"leverage\": {}, \"position_size_usd\": {:.0}, \"stop_loss\": 103000, \"take_profit\": 97000, \"confidence\": 85, \"risk_usd\": 300, \"reasoning\": \"downtrend and MACD cross\"}},\n",
        limits.btc_eth_leverage,
        equity * 5.0
    ));
    s.push_str("  {\"symbol\": \"ETHUSDT\", \"action\": \"close_long\", \"reasoning\": \"take profit\"}\n");
    s.push_str("]\n```\n\n");
    s.push_str("Fields: `action` is one of open_long | open_short | close_long | close_short | hold | wait.\n");
    s.push_str("Opening requires: leverage, position_size_usd, stop_loss, take_profit, confidence (0-100), risk_usd, reasoning.\n");
    s.push_str("Close/hold/wait require only: symbol, action, reasoning.\n");
    s.push_str("Numeric fields must be plain numbers, never arithmetic expressions.\n\n");

    s.push_str("# Stop-loss and take-profit placement\n\n");
    s.push_str("open_long: stop_loss < entry < take_profit.\n");
    s.push_str("open_short: take_profit < entry < stop_loss. This is the reverse of the long case; never reuse long-side placement for shorts.\n\n");
    s.push_str("Short-side worked example (entry = 3889.28):\n");
    s.push_str("1. risk_points = 38.90\n");
    s.push_str("2. stop_loss = 3889.28 + 38.90 = 3928.18 (above entry)\n");
    s.push_str("3. take_profit = 3889.28 - 38.90 * 3 = 3772.58 (below entry)\n");
    s.push_str("4. risk = 3928.18 - 3889.28 = 38.90, reward = 3889.28 - 3772.58 = 116.70, RR = 3.0\n\n");
    s.push_str("General rule: long risk = entry - stop_loss, long reward = take_profit - entry; short risk = stop_loss - entry, short reward = entry - take_profit; reward / risk must be >= 3.0.\n");

    s
}

fn build_user_prompt(ctx: &DecisionContext) -> String {
    let mut s = String::new();

    // Header
    s.push_str(&format!(
        "**time**: {} | **cycle**: #{} | **runtime**: {} min\n\n",
        ctx.current_time, ctx.cycle_number, ctx.runtime_minutes
    ));

    // BTC summary, when present among the snapshots
    if let Some(btc) = ctx.snapshots.get("BTCUSDT") {
        s.push_str(&format!(
            "**BTC**: {:.2} (1h: {:+.2}%, 4h: {:+.2}%) | MACD: {:.4} | RSI7: {:.2}\n\n",
            btc.current_price,
            btc.price_change_1h,
            btc.price_change_4h,
            btc.current_macd(),
            btc.current_rsi7()
        ));
    }

    // Account summary
    let acct = &ctx.account;
    let avail_pct = if acct.total_equity > 0.0 {
        acct.available_balance / acct.total_equity * 100.0
    } else {
        0.0
    };
    s.push_str(&format!(
        "**account**: equity {:.2} | available {:.2} ({:.1}%) | pnl {:+.2}% | margin {:.1}% | positions {}\n\n",
        acct.total_equity,
        acct.available_balance,
        avail_pct,
        acct.total_pnl_pct,
        acct.margin_used_pct,
        acct.position_count
    ));

    // Open positions with full snapshots
    if ctx.positions.is_empty() {
        s.push_str("**open positions**: none\n\n");
    } else {
        s.push_str("## Open positions\n\n");
        for (i, pos) in ctx.positions.iter().enumerate() {
            s.push_str(&format_position_line(i + 1, pos));
            if let Some(snapshot) = ctx.snapshots.get(&pos.symbol) {
                s.push_str(&format_snapshot(snapshot));
                if let Some(analysis) = indicators::analyze(snapshot) {
                    s.push_str("\n### Indicator analysis\n\n");
                    s.push_str(&analysis);
                    s.push('\n');
                }
            }
            s.push('\n');
        }
    }

    // Candidates not already listed as positions
    let position_symbols: Vec<&str> = ctx.positions.iter().map(|p| p.symbol.as_str()).collect();
    let listed: Vec<&CandidateCoin> = ctx
        .candidates
        .iter()
        .filter(|c| !position_symbols.contains(&c.symbol.as_str()))
        .filter(|c| ctx.snapshots.contains_key(&c.symbol))
        .collect();

    s.push_str(&format!("## Candidates ({})\n\n", listed.len()));
    for (i, coin) in listed.iter().enumerate() {
        let tag = source_tag(coin);
        s.push_str(&format!("### {}. {}{}\n\n", i + 1, coin.symbol, tag));
        if let Some(snapshot) = ctx.snapshots.get(&coin.symbol) {
            s.push_str(&format_snapshot(snapshot));
            if let Some(analysis) = indicators::analyze(snapshot) {
                s.push_str("\n### Indicator analysis\n\n");
                s.push_str(&analysis);
                s.push('\n');
            }
        }
        s.push('\n');
    }

    // Performance feedback: only the Sharpe ratio is surfaced here
    if let Some(sharpe) = ctx.sharpe_ratio {
        s.push_str(&format!("## Sharpe ratio: {sharpe:.2}\n\n"));
    }

    s.push_str("---\n\n");
    s.push_str("Analyze and output your decisions now.\n\n");
    s.push_str("Required format: a short chain-of-thought analysis, then a valid JSON array (starting with [ and ending with ]) containing every decision. The JSON array is mandatory; output `[]` if there is nothing to do.\n");

    s
}

fn format_position_line(index: usize, pos: &PositionInfo) -> String {
    let mut line = format!(
        "{index}. {} {} | entry {:.4} mark {:.4} | pnl {:+.2}% | {}x | margin {:.0} | liq {:.4}",
        pos.symbol,
        pos.side.as_str().to_uppercase(),
        pos.entry_price,
        pos.mark_price,
        pos.unrealized_pnl_pct,
        pos.leverage,
        pos.margin_used,
        pos.liquidation_price,
    );

    if pos.update_time_ms > 0 {
        let held_min = (Utc::now().timestamp_millis() - pos.update_time_ms) / 60_000;
        if held_min >= 0 {
            if held_min < 60 {
                line.push_str(&format!(" | held {held_min} min"));
            } else {
                line.push_str(&format!(" | held {}h {}min", held_min / 60, held_min % 60));
            }
        }
    }
    line.push_str("\n\n");
    line
}

fn source_tag(coin: &CandidateCoin) -> &'static str {
    use crate::domain::CandidateSource;
    if coin.is_double_signal() {
        " (AI500+OI_Top double signal)"
    } else if coin.sources == [CandidateSource::OiTop] {
        " (OI_Top position growth)"
    } else {
        ""
    }
}
