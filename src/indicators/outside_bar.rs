//! Outside-bar detection with a contrarian signal reading.
//!
//! An outside bar engulfs the prior bar's full range (higher high and lower
//! low). When the close also pierces the prior extreme, the signal is read
//! contrarian: close below the prior low argues long, close above the prior
//! high argues short.

use serde::Serialize;

use crate::domain::Kline;

/// Body ratio (current body / previous body) below which the bar is ignored.
const MIN_BODY_RATIO: f64 = 2.0;
/// Body ratio at which strength saturates at 1.0.
const STRENGTH_SATURATION_RATIO: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutsideBarDirection {
    Long,
    Short,
    Wait,
}

impl std::fmt::Display for OutsideBarDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
            Self::Wait => write!(f, "WAIT"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutsideBarResult {
    pub direction: OutsideBarDirection,
    pub body_ratio: f64,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Signal strength in [0, 1], growing with body ratio.
    pub strength: f64,
    pub reasoning: Vec<String>,
}

impl OutsideBarResult {
    fn wait(body_ratio: f64, reason: String) -> Self {
        Self {
            direction: OutsideBarDirection::Wait,
            body_ratio,
            confidence: 0.0,
            strength: 0.0,
            reasoning: vec![reason],
        }
    }
}

/// Analyze the last two bars of a series for an outside-bar signal.
pub fn detect_outside_bar(klines: &[Kline]) -> OutsideBarResult {
    if klines.len() < 2 {
        return OutsideBarResult::wait(0.0, "insufficient data for outside bar analysis".into());
    }

    let current = &klines[klines.len() - 1];
    let previous = &klines[klines.len() - 2];

    let is_outside = current.high > previous.high && current.low < previous.low;
    if !is_outside {
        return OutsideBarResult::wait(0.0, "no outside bar detected".into());
    }

    let body_ratio = if previous.body() > 0.0 {
        current.body() / previous.body()
    } else {
        0.0
    };
    if body_ratio < MIN_BODY_RATIO {
        return OutsideBarResult::wait(
            body_ratio,
            format!("body ratio {body_ratio:.2} below minimum {MIN_BODY_RATIO:.2}"),
        );
    }

    let strength = (body_ratio / STRENGTH_SATURATION_RATIO).min(1.0);

    if current.close < previous.low {
        OutsideBarResult {
            direction: OutsideBarDirection::Long,
            body_ratio,
            confidence: 0.75,
            strength,
            reasoning: vec![
                "outside bar detected".into(),
                format!(
                    "close ({:.2}) < previous low ({:.2}): contrarian long",
                    current.close, previous.low
                ),
                format!("body ratio {body_ratio:.2}"),
            ],
        }
    } else if current.close > previous.high {
        OutsideBarResult {
            direction: OutsideBarDirection::Short,
            body_ratio,
            confidence: 0.75,
            strength,
            reasoning: vec![
                "outside bar detected".into(),
                format!(
                    "close ({:.2}) > previous high ({:.2}): contrarian short",
                    current.close, previous.high
                ),
                format!("body ratio {body_ratio:.2}"),
            ],
        }
    } else {
        OutsideBarResult::wait(body_ratio, "outside bar without a close-through".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Kline {
        Kline {
            open_time_ms: 0,
            open,
            high,
            low,
            close,
            volume: 1.0,
            close_time_ms: 1,
        }
    }

    fn pair(prev: Kline, mut cur: Kline) -> Vec<Kline> {
        cur.open_time_ms = prev.open_time_ms + 1;
        cur.close_time_ms = cur.open_time_ms + 1;
        vec![prev, cur]
    }

    #[test]
    fn close_below_prior_low_is_contrarian_long() {
        let prev = bar(100.0, 101.0, 99.0, 100.5); // body 0.5
        let cur = bar(101.0, 102.0, 97.0, 98.0); // outside, body 3.0, closes below 99
        let result = detect_outside_bar(&pair(prev, cur));
        assert_eq!(result.direction, OutsideBarDirection::Long);
        assert!((result.body_ratio - 6.0).abs() < 1e-9);
        assert_eq!(result.strength, 1.0);
    }

    #[test]
    fn close_above_prior_high_is_contrarian_short() {
        let prev = bar(100.0, 101.0, 99.0, 100.5);
        let cur = bar(99.5, 103.0, 98.5, 102.5);
        let result = detect_outside_bar(&pair(prev, cur));
        assert_eq!(result.direction, OutsideBarDirection::Short);
    }

    #[test]
    fn small_body_ratio_is_filtered() {
        let prev = bar(100.0, 101.0, 99.0, 100.5); // body 0.5
        let cur = bar(100.2, 101.5, 98.5, 100.9); // outside but body 0.7 (ratio 1.4)
        let result = detect_outside_bar(&pair(prev, cur));
        assert_eq!(result.direction, OutsideBarDirection::Wait);
        assert!(result.reasoning[0].contains("below minimum"));
    }

    #[test]
    fn inside_bar_is_wait() {
        let prev = bar(100.0, 102.0, 98.0, 101.0);
        let cur = bar(101.0, 101.5, 99.0, 100.0);
        let result = detect_outside_bar(&pair(prev, cur));
        assert_eq!(result.direction, OutsideBarDirection::Wait);
    }

    #[test]
    fn close_inside_prior_range_is_wait_despite_outside_bar() {
        let prev = bar(100.0, 101.0, 99.0, 100.2); // body 0.2
        let cur = bar(100.8, 102.0, 98.0, 100.0); // outside, body 0.8, close inside
        let result = detect_outside_bar(&pair(prev, cur));
        assert_eq!(result.direction, OutsideBarDirection::Wait);
        assert!(result.body_ratio >= MIN_BODY_RATIO);
    }
}
