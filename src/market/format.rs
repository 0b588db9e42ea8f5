//! Snapshot rendering for the user prompt.

use crate::domain::{MarketSnapshot, TimeframeSeries};

/// Closes/volumes shown per timeframe in the prompt.
const SERIES_TAIL: usize = 10;

/// Render a snapshot into the block of text the model sees for one symbol.
pub fn format_snapshot(snapshot: &MarketSnapshot) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "price: {:.4} | 1h: {:+.2}% | 4h: {:+.2}%\n",
        snapshot.current_price, snapshot.price_change_1h, snapshot.price_change_4h
    ));
    out.push_str(&format!(
        "EMA20: {} | MACD: {} | RSI7: {} | RSI14: {}\n",
        fmt_val(snapshot.current_ema20(), 4),
        fmt_val(snapshot.current_macd(), 4),
        fmt_val(snapshot.current_rsi7(), 2),
        fmt_val(snapshot.current_rsi14(), 2),
    ));
    out.push_str(&format!(
        "ATR14(3m): {} | ATR14(4h): {}\n",
        fmt_val(snapshot.intraday.atr14, 4),
        fmt_val(snapshot.longer_term.atr14, 4),
    ));

    out.push_str(&format_timeframe("3m", &snapshot.intraday));
    out.push_str(&format_timeframe("4h", &snapshot.longer_term));

    if let Some(oi) = snapshot.open_interest {
        out.push_str(&format!(
            "open interest: latest {:.0} | average {:.0} | value {:.1}M USD\n",
            oi.latest,
            oi.average,
            oi.value_usd(snapshot.current_price) / 1_000_000.0
        ));
    }
    if let Some(rate) = snapshot.funding_rate {
        out.push_str(&format!("funding rate: {:+.5}%\n", rate * 100.0));
    }

    out
}

fn format_timeframe(label: &str, series: &TimeframeSeries) -> String {
    let closes = series.closes();
    let volumes = series.volumes();
    format!(
        "{label} closes: [{}]\n{label} volumes: [{}]\n",
        tail_csv(&closes, 4),
        tail_csv(&volumes, 1),
    )
}

fn tail_csv(values: &[f64], decimals: usize) -> String {
    let start = values.len().saturating_sub(SERIES_TAIL);
    values[start..]
        .iter()
        .map(|v| format!("{v:.decimals$}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn fmt_val(value: f64, decimals: usize) -> String {
    if value.is_finite() {
        format!("{value:.decimals$}")
    } else {
        "n/a".to_string()
    }
}
