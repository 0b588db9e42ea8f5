//! Candlestick pattern detection over the last three bars of a series.
//!
//! Thresholds are fixed constants so tests can target them directly.

use serde::Serialize;

use crate::domain::Kline;

/// Body percent (of range) at or below which a bar counts as a doji.
const DOJI_BODY_PCT: f64 = 5.0;
/// Body percent below which a hammer-family bar qualifies.
const HAMMER_BODY_PCT: f64 = 30.0;
/// Dominant shadow must exceed this multiple of the body (as a percent).
const HAMMER_SHADOW_BODY_PCT: f64 = 200.0;
/// Opposite shadow must stay under this percent of the body.
const HAMMER_OPPOSITE_SHADOW_PCT: f64 = 20.0;
/// Dominant shadow must cover this much of the full range.
const HAMMER_SHADOW_RANGE_PCT: f64 = 60.0;
/// Marubozu body coverage of the range.
const MARUBOZU_BODY_PCT: f64 = 90.0;
/// Tweezer high/low tolerance as a fraction of price.
const TWEEZER_TOLERANCE: f64 = 0.001;
/// Bars looked back for the preceding-trend check on hammer/shooting-star.
const TREND_LOOKBACK: usize = 5;

/// Directional reading of a detected pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternBias {
    Bullish,
    Bearish,
    Neutral,
}

/// A detected candlestick pattern.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternResult {
    pub pattern: &'static str,
    pub bias: PatternBias,
    /// Detection confidence in [0, 1].
    pub confidence: f64,
}

impl PatternResult {
    fn new(pattern: &'static str, bias: PatternBias, confidence: f64) -> Self {
        Self {
            pattern,
            bias,
            confidence,
        }
    }
}

/// Geometry of a single candle, precomputed once per bar.
#[derive(Debug, Clone, Copy, Default)]
struct CandleProps {
    body_pct: f64,
    body_size: f64,
    is_bullish: bool,
    is_bearish: bool,
    upper_shadow_pct: f64,
    lower_shadow_pct: f64,
    upper_shadow_range_pct: f64,
    lower_shadow_range_pct: f64,
}

fn props(k: &Kline) -> CandleProps {
    let range = k.range();
    let body = k.body();
    let body_pct = if range > 0.0 { body / range * 100.0 } else { 0.0 };

    let is_bullish = k.is_bullish();
    let (upper_shadow, lower_shadow) = if is_bullish {
        (k.high - k.close, k.open - k.low)
    } else {
        (k.high - k.open, k.close - k.low)
    };

    let safe_body = if body == 0.0 { 1e-6 } else { body };
    let (upper_range_pct, lower_range_pct) = if range > 0.0 {
        (upper_shadow / range * 100.0, lower_shadow / range * 100.0)
    } else {
        (0.0, 0.0)
    };

    CandleProps {
        body_pct,
        body_size: body,
        is_bullish,
        is_bearish: k.is_bearish(),
        upper_shadow_pct: upper_shadow / safe_body * 100.0,
        lower_shadow_pct: lower_shadow / safe_body * 100.0,
        upper_shadow_range_pct: upper_range_pct,
        lower_shadow_range_pct: lower_range_pct,
    }
}

/// True when the close five bars back sits below the current close.
fn in_uptrend(klines: &[Kline]) -> bool {
    if klines.len() < TREND_LOOKBACK + 1 {
        return false;
    }
    let current = klines[klines.len() - 1].close;
    let past = klines[klines.len() - 1 - TREND_LOOKBACK].close;
    current > past
}

/// Detect all recognized candlestick patterns on the latest bars.
///
/// Needs at least three bars; returns an empty list otherwise.
pub fn detect_candlestick_patterns(klines: &[Kline]) -> Vec<PatternResult> {
    if klines.len() < 3 {
        return Vec::new();
    }

    let current = &klines[klines.len() - 1];
    let previous = &klines[klines.len() - 2];
    let previous2 = &klines[klines.len() - 3];

    let cur = props(current);
    let prev = props(previous);
    let prev2 = props(previous2);

    let mut results = Vec::new();

    // Single-candle patterns
    if let Some(p) = hammer(cur, klines) {
        results.push(p);
    }
    if let Some(p) = inverted_hammer(cur, klines) {
        results.push(p);
    }
    let dragonfly = dragonfly_doji(cur);
    let gravestone = gravestone_doji(cur);
    if let Some(p) = dragonfly.clone() {
        results.push(p);
    }
    if let Some(p) = gravestone.clone() {
        results.push(p);
    }
    if dragonfly.is_none() && gravestone.is_none() {
        if let Some(p) = doji(cur) {
            results.push(p);
        }
    }
    if let Some(p) = marubozu(cur) {
        results.push(p);
    }
    if let Some(p) = spinning_top(cur) {
        results.push(p);
    }

    // Two-candle patterns
    if let Some(p) = bullish_engulfing(current, previous, cur, prev) {
        results.push(p);
    }
    if let Some(p) = bearish_engulfing(current, previous, cur, prev) {
        results.push(p);
    }
    if let Some(p) = bullish_harami(current, previous, cur, prev) {
        results.push(p);
    }
    if let Some(p) = bearish_harami(current, previous, cur, prev) {
        results.push(p);
    }
    if let Some(p) = tweezer_top(current, previous, klines) {
        results.push(p);
    }
    if let Some(p) = tweezer_bottom(current, previous, klines) {
        results.push(p);
    }

    // Three-candle patterns
    if let Some(p) = morning_star(current, previous2, prev, cur, prev2) {
        results.push(p);
    }
    if let Some(p) = evening_star(current, previous2, prev, cur, prev2) {
        results.push(p);
    }
    if let Some(p) = three_white_soldiers(current, previous, previous2, cur, prev, prev2) {
        results.push(p);
    }
    if let Some(p) = three_black_crows(current, previous, previous2, cur, prev, prev2) {
        results.push(p);
    }
    if let Some(p) = abandoned_baby_bullish(current, previous, previous2, cur, prev, prev2) {
        results.push(p);
    }
    if let Some(p) = abandoned_baby_bearish(current, previous, previous2, cur, prev, prev2) {
        results.push(p);
    }

    results
}

fn hammer(p: CandleProps, klines: &[Kline]) -> Option<PatternResult> {
    let shape = p.body_pct < HAMMER_BODY_PCT
        && p.lower_shadow_pct > HAMMER_SHADOW_BODY_PCT
        && p.upper_shadow_pct < HAMMER_OPPOSITE_SHADOW_PCT
        && p.lower_shadow_range_pct > HAMMER_SHADOW_RANGE_PCT;
    if !shape {
        return None;
    }
    if in_uptrend(klines) {
        Some(PatternResult::new("Hanging Man", PatternBias::Bearish, 0.7))
    } else {
        Some(PatternResult::new("Hammer", PatternBias::Bullish, 0.7))
    }
}

fn inverted_hammer(p: CandleProps, klines: &[Kline]) -> Option<PatternResult> {
    let shape = p.body_pct < HAMMER_BODY_PCT
        && p.upper_shadow_pct > HAMMER_SHADOW_BODY_PCT
        && p.lower_shadow_pct < HAMMER_OPPOSITE_SHADOW_PCT
        && p.upper_shadow_range_pct > HAMMER_SHADOW_RANGE_PCT;
    if !shape {
        return None;
    }
    if in_uptrend(klines) {
        Some(PatternResult::new("Shooting Star", PatternBias::Bearish, 0.7))
    } else {
        Some(PatternResult::new("Inverted Hammer", PatternBias::Bullish, 0.7))
    }
}

fn dragonfly_doji(p: CandleProps) -> Option<PatternResult> {
    (p.body_pct <= DOJI_BODY_PCT
        && p.lower_shadow_range_pct > 60.0
        && p.upper_shadow_range_pct < 10.0)
        .then(|| PatternResult::new("Dragonfly Doji", PatternBias::Bullish, 0.75))
}

fn gravestone_doji(p: CandleProps) -> Option<PatternResult> {
    (p.body_pct <= DOJI_BODY_PCT
        && p.upper_shadow_range_pct > 60.0
        && p.lower_shadow_range_pct < 10.0)
        .then(|| PatternResult::new("Gravestone Doji", PatternBias::Bearish, 0.75))
}

fn doji(p: CandleProps) -> Option<PatternResult> {
    (p.body_pct <= DOJI_BODY_PCT).then(|| PatternResult::new("Doji", PatternBias::Neutral, 0.6))
}

fn marubozu(p: CandleProps) -> Option<PatternResult> {
    let shape = p.body_pct > MARUBOZU_BODY_PCT
        && p.upper_shadow_range_pct < 5.0
        && p.lower_shadow_range_pct < 5.0;
    shape.then(|| {
        let bias = if p.is_bullish {
            PatternBias::Bullish
        } else {
            PatternBias::Bearish
        };
        PatternResult::new("Marubozu", bias, 0.8)
    })
}

fn spinning_top(p: CandleProps) -> Option<PatternResult> {
    (p.body_pct < 25.0 && p.upper_shadow_range_pct > 25.0 && p.lower_shadow_range_pct > 25.0)
        .then(|| PatternResult::new("Spinning Top", PatternBias::Neutral, 0.6))
}

fn bullish_engulfing(
    current: &Kline,
    previous: &Kline,
    cur: CandleProps,
    prev: CandleProps,
) -> Option<PatternResult> {
    (cur.is_bullish
        && prev.is_bearish
        && current.open < previous.close
        && current.close > previous.open
        && cur.body_pct > 50.0)
        .then(|| PatternResult::new("Bullish Engulfing", PatternBias::Bullish, 0.8))
}

fn bearish_engulfing(
    current: &Kline,
    previous: &Kline,
    cur: CandleProps,
    prev: CandleProps,
) -> Option<PatternResult> {
    (cur.is_bearish
        && prev.is_bullish
        && current.open > previous.close
        && current.close < previous.open
        && cur.body_pct > 50.0)
        .then(|| PatternResult::new("Bearish Engulfing", PatternBias::Bearish, 0.8))
}

fn bullish_harami(
    current: &Kline,
    previous: &Kline,
    cur: CandleProps,
    prev: CandleProps,
) -> Option<PatternResult> {
    (cur.is_bullish
        && prev.is_bearish
        && prev.body_size > cur.body_size
        && current.open > previous.close
        && current.close < previous.open)
        .then(|| PatternResult::new("Bullish Harami", PatternBias::Bullish, 0.7))
}

fn bearish_harami(
    current: &Kline,
    previous: &Kline,
    cur: CandleProps,
    prev: CandleProps,
) -> Option<PatternResult> {
    (cur.is_bearish
        && prev.is_bullish
        && prev.body_size > cur.body_size
        && current.open < previous.close
        && current.close > previous.open)
        .then(|| PatternResult::new("Bearish Harami", PatternBias::Bearish, 0.7))
}

fn tweezer_top(current: &Kline, previous: &Kline, klines: &[Kline]) -> Option<PatternResult> {
    let tolerance = previous.high * TWEEZER_TOLERANCE;
    let highs_match = (current.high - previous.high).abs() < tolerance;

    let uptrend = klines.len() >= 4 && previous.close > klines[klines.len() - 4].close;

    (previous.is_bullish() && current.is_bearish() && highs_match && uptrend)
        .then(|| PatternResult::new("Tweezer Top", PatternBias::Bearish, 0.75))
}

fn tweezer_bottom(current: &Kline, previous: &Kline, klines: &[Kline]) -> Option<PatternResult> {
    let tolerance = previous.low * TWEEZER_TOLERANCE;
    let lows_match = (current.low - previous.low).abs() < tolerance;

    let downtrend = klines.len() >= 4 && previous.close < klines[klines.len() - 4].close;

    (previous.is_bearish() && current.is_bullish() && lows_match && downtrend)
        .then(|| PatternResult::new("Tweezer Bottom", PatternBias::Bullish, 0.75))
}

fn morning_star(
    current: &Kline,
    previous2: &Kline,
    prev: CandleProps,
    cur: CandleProps,
    prev2: CandleProps,
) -> Option<PatternResult> {
    (prev2.is_bearish
        && prev.body_pct < 30.0
        && cur.is_bullish
        && current.close > previous2.open - prev2.body_size / 2.0)
        .then(|| PatternResult::new("Morning Star", PatternBias::Bullish, 0.85))
}

fn evening_star(
    current: &Kline,
    previous2: &Kline,
    prev: CandleProps,
    cur: CandleProps,
    prev2: CandleProps,
) -> Option<PatternResult> {
    (prev2.is_bullish
        && prev.body_pct < 30.0
        && cur.is_bearish
        && current.close < previous2.open + prev2.body_size / 2.0)
        .then(|| PatternResult::new("Evening Star", PatternBias::Bearish, 0.85))
}

fn three_white_soldiers(
    current: &Kline,
    previous: &Kline,
    previous2: &Kline,
    cur: CandleProps,
    prev: CandleProps,
    prev2: CandleProps,
) -> Option<PatternResult> {
    (cur.is_bullish
        && prev.is_bullish
        && prev2.is_bullish
        && current.close > previous.close
        && previous.close > previous2.close
        && cur.body_pct > 50.0
        && prev.body_pct > 50.0
        && prev2.body_pct > 50.0)
        .then(|| PatternResult::new("Three White Soldiers", PatternBias::Bullish, 0.9))
}

fn three_black_crows(
    current: &Kline,
    previous: &Kline,
    previous2: &Kline,
    cur: CandleProps,
    prev: CandleProps,
    prev2: CandleProps,
) -> Option<PatternResult> {
    (cur.is_bearish
        && prev.is_bearish
        && prev2.is_bearish
        && current.close < previous.close
        && previous.close < previous2.close
        && cur.body_pct > 50.0
        && prev.body_pct > 50.0
        && prev2.body_pct > 50.0)
        .then(|| PatternResult::new("Three Black Crows", PatternBias::Bearish, 0.9))
}

fn abandoned_baby_bullish(
    current: &Kline,
    previous: &Kline,
    previous2: &Kline,
    cur: CandleProps,
    prev: CandleProps,
    prev2: CandleProps,
) -> Option<PatternResult> {
    let is_doji = prev.body_pct < DOJI_BODY_PCT;
    let gap_down = previous.low > previous2.close;
    let gap_up = previous.high < current.close;

    (prev2.is_bearish && is_doji && gap_down && gap_up && cur.is_bullish)
        .then(|| PatternResult::new("Abandoned Baby Bullish", PatternBias::Bullish, 0.85))
}

fn abandoned_baby_bearish(
    current: &Kline,
    previous: &Kline,
    previous2: &Kline,
    cur: CandleProps,
    prev: CandleProps,
    prev2: CandleProps,
) -> Option<PatternResult> {
    let is_doji = prev.body_pct < DOJI_BODY_PCT;
    let gap_up = previous.high < previous2.close;
    let gap_down = previous.low > current.close;

    (prev2.is_bullish && is_doji && gap_up && gap_down && cur.is_bearish)
        .then(|| PatternResult::new("Abandoned Baby Bearish", PatternBias::Bearish, 0.85))
}
