use chrono::{DateTime, Utc};

use super::Kline;

/// Open interest snapshot for a symbol.
///
/// `average` is the uniform provider placeholder (`latest * 0.999`), not a
/// computed rolling average.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpenInterest {
    pub latest: f64,
    pub average: f64,
}

impl OpenInterest {
    pub fn from_latest(latest: f64) -> Self {
        Self {
            latest,
            average: latest * 0.999,
        }
    }

    /// Notional OI value in USD at the given price (the liquidity-filter input).
    pub fn value_usd(&self, price: f64) -> f64 {
        self.latest * price
    }
}

/// One timeframe of a snapshot: the raw bars plus derived indicator series.
///
/// Derived series are index-aligned with `klines`; slots before an indicator
/// has enough history are `f64::NAN`.
#[derive(Debug, Clone)]
pub struct TimeframeSeries {
    pub interval: String,
    pub klines: Vec<Kline>,
    pub ema20: Vec<f64>,
    pub macd_histogram: Vec<f64>,
    pub rsi7: Vec<f64>,
    pub rsi14: Vec<f64>,
    pub atr14: f64,
}

impl TimeframeSeries {
    pub fn closes(&self) -> Vec<f64> {
        self.klines.iter().map(|k| k.close).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.klines.iter().map(|k| k.volume).collect()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.klines.last().map(|k| k.close)
    }
}

/// Immutable per-symbol market view assembled at the start of a cycle and
/// discarded at cycle end.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub current_price: f64,
    pub price_change_1h: f64,
    pub price_change_4h: f64,
    /// Short-horizon series (3-minute bars).
    pub intraday: TimeframeSeries,
    /// Long-horizon series (4-hour bars).
    pub longer_term: TimeframeSeries,
    pub open_interest: Option<OpenInterest>,
    pub funding_rate: Option<f64>,
    pub captured_at: DateTime<Utc>,
}

fn last_finite(series: &[f64]) -> f64 {
    series
        .iter()
        .rev()
        .copied()
        .find(|v| v.is_finite())
        .unwrap_or(f64::NAN)
}

impl MarketSnapshot {
    pub fn current_ema20(&self) -> f64 {
        last_finite(&self.intraday.ema20)
    }

    pub fn current_macd(&self) -> f64 {
        last_finite(&self.intraday.macd_histogram)
    }

    pub fn current_rsi7(&self) -> f64 {
        last_finite(&self.intraday.rsi7)
    }

    pub fn current_rsi14(&self) -> f64 {
        last_finite(&self.intraday.rsi14)
    }

    /// OI value in USD, if open interest is known.
    pub fn oi_value_usd(&self) -> Option<f64> {
        self.open_interest.map(|oi| oi.value_usd(self.current_price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_interest_placeholder_average() {
        let oi = OpenInterest::from_latest(1000.0);
        assert!((oi.average - 999.0).abs() < 1e-9);
        assert_eq!(oi.value_usd(2.0), 2000.0);
    }

    #[test]
    fn last_finite_skips_nan_tail() {
        assert_eq!(last_finite(&[f64::NAN, 1.0, 2.0, f64::NAN]), 2.0);
        assert!(last_finite(&[f64::NAN, f64::NAN]).is_nan());
        assert!(last_finite(&[]).is_nan());
    }
}
