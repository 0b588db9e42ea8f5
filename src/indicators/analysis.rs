//! Combined signal analysis rendered as prompt-ready text.

use crate::domain::MarketSnapshot;

use super::outside_bar::{detect_outside_bar, OutsideBarDirection};
use super::patterns::{detect_candlestick_patterns, PatternBias};

/// Run pattern detection over a snapshot and format anything that fired.
///
/// Candlestick patterns are read on the intraday bars, the outside-bar signal
/// on the long-horizon bars. Returns `None` when nothing was detected.
pub fn analyze(snapshot: &MarketSnapshot) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    let mut bullish = 0usize;
    let mut bearish = 0usize;

    let patterns = detect_candlestick_patterns(&snapshot.intraday.klines);
    if !patterns.is_empty() {
        parts.push("=== CANDLESTICK PATTERNS ===".into());
        for p in &patterns {
            let direction = match p.bias {
                PatternBias::Bullish => {
                    bullish += 1;
                    "BULLISH"
                }
                PatternBias::Bearish => {
                    bearish += 1;
                    "BEARISH"
                }
                PatternBias::Neutral => "NEUTRAL",
            };
            parts.push(format!(
                "- {} ({}, confidence {:.0}%)",
                p.pattern,
                direction,
                p.confidence * 100.0
            ));
        }
        parts.push(format!(
            "Summary: {bullish} bullish, {bearish} bearish patterns detected"
        ));
        parts.push(String::new());
    }

    let outside = detect_outside_bar(&snapshot.longer_term.klines);
    if outside.direction != OutsideBarDirection::Wait {
        match outside.direction {
            OutsideBarDirection::Long => bullish += 1,
            OutsideBarDirection::Short => bearish += 1,
            OutsideBarDirection::Wait => {}
        }
        parts.push("=== OUTSIDE BAR (4h) ===".into());
        parts.push(format!("Signal: {}", outside.direction));
        parts.push(format!(
            "Confidence: {:.0}%, strength: {:.0}%, body ratio: {:.2}",
            outside.confidence * 100.0,
            outside.strength * 100.0,
            outside.body_ratio
        ));
        for reason in &outside.reasoning {
            parts.push(format!("  - {reason}"));
        }
        parts.push(String::new());
    }

    if parts.is_empty() {
        return None;
    }

    parts.push("=== SIGNAL INTERPRETATION ===".into());
    let bias = if bullish > bearish {
        format!("Overall bias: BULLISH ({bullish} bullish vs {bearish} bearish signals)")
    } else if bearish > bullish {
        format!("Overall bias: BEARISH ({bearish} bearish vs {bullish} bullish signals)")
    } else {
        format!("Overall bias: NEUTRAL ({bullish} bullish, {bearish} bearish)")
    };
    parts.push(bias);

    Some(parts.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Kline, TimeframeSeries};
    use chrono::Utc;

    fn bar(i: i64, open: f64, high: f64, low: f64, close: f64) -> Kline {
        Kline {
            open_time_ms: i * 180_000,
            open,
            high,
            low,
            close,
            volume: 1.0,
            close_time_ms: i * 180_000 + 180_000,
        }
    }

    fn series(klines: Vec<Kline>) -> TimeframeSeries {
        TimeframeSeries {
            interval: "3m".into(),
            klines,
            ema20: Vec::new(),
            macd_histogram: Vec::new(),
            rsi7: Vec::new(),
            rsi14: Vec::new(),
            atr14: f64::NAN,
        }
    }

    fn snapshot(intraday: Vec<Kline>, longer: Vec<Kline>) -> MarketSnapshot {
        MarketSnapshot {
            symbol: "BTCUSDT".into(),
            current_price: 100.0,
            price_change_1h: 0.0,
            price_change_4h: 0.0,
            intraday: series(intraday),
            longer_term: series(longer),
            open_interest: None,
            funding_rate: None,
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn quiet_market_yields_none() {
        // Identical flat bars: no pattern, no outside bar.
        let flat: Vec<Kline> = (0..6).map(|i| bar(i, 100.0, 100.4, 99.6, 100.2)).collect();
        let snap = snapshot(flat.clone(), flat);
        assert!(analyze(&snap).is_none());
    }

    #[test]
    fn engulfing_shows_in_summary() {
        let mut intraday: Vec<Kline> = (0..3).map(|i| bar(i, 100.0, 100.4, 99.6, 100.0)).collect();
        intraday.push(bar(3, 101.0, 101.2, 99.4, 99.5));
        intraday.push(bar(4, 99.0, 102.3, 98.9, 102.0));
        let flat: Vec<Kline> = (0..3).map(|i| bar(i, 100.0, 100.4, 99.6, 100.2)).collect();

        let text = analyze(&snapshot(intraday, flat)).expect("patterns expected");
        assert!(text.contains("Bullish Engulfing"));
        assert!(text.contains("SIGNAL INTERPRETATION"));
    }
}
