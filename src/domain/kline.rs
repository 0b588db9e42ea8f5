use serde::{Deserialize, Serialize};

/// One OHLCV bar.
///
/// Series are ordered by `open_time_ms` strictly ascending and satisfy
/// `low <= open, close <= high` and `close_time_ms > open_time_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub open_time_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time_ms: i64,
}

impl Kline {
    /// Bar range (high - low).
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Absolute body size.
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// Sanity check for a well-formed bar.
    pub fn is_valid(&self) -> bool {
        self.low <= self.open.min(self.close)
            && self.high >= self.open.max(self.close)
            && self.close_time_ms > self.open_time_ms
    }
}

/// Checks that a series is strictly ordered by open time and every bar is well-formed.
pub fn is_ordered_series(klines: &[Kline]) -> bool {
    klines.windows(2).all(|w| w[0].open_time_ms < w[1].open_time_ms)
        && klines.iter().all(Kline::is_valid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open_time_ms: i64, open: f64, high: f64, low: f64, close: f64) -> Kline {
        Kline {
            open_time_ms,
            open,
            high,
            low,
            close,
            volume: 1.0,
            close_time_ms: open_time_ms + 180_000,
        }
    }

    #[test]
    fn valid_bar_passes_invariants() {
        let k = bar(0, 100.0, 110.0, 95.0, 105.0);
        assert!(k.is_valid());
        assert!(k.is_bullish());
        assert_eq!(k.range(), 15.0);
        assert_eq!(k.body(), 5.0);
    }

    #[test]
    fn inverted_high_low_is_rejected() {
        let k = bar(0, 100.0, 99.0, 101.0, 100.5);
        assert!(!k.is_valid());
    }

    #[test]
    fn ordering_check_detects_out_of_order_bars() {
        let good = vec![bar(0, 1.0, 2.0, 0.5, 1.5), bar(180_000, 1.5, 2.5, 1.0, 2.0)];
        let bad = vec![bar(180_000, 1.5, 2.5, 1.0, 2.0), bar(0, 1.0, 2.0, 0.5, 1.5)];
        assert!(is_ordered_series(&good));
        assert!(!is_ordered_series(&bad));
    }
}
