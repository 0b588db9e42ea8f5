//! Moving-average family indicators.
//!
//! All functions return a series of the same length as the input with
//! `f64::NAN` in the leading slots where the indicator has insufficient
//! history (EMA/RSI: `period - 1` slots; ATR: `period` slots).

use crate::domain::Kline;

/// Exponential moving average. Seeded with the SMA of the first `period`
/// values; the first `period - 1` slots are NaN.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let seed: f64 = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = seed;

    let k = 2.0 / (period as f64 + 1.0);
    let mut prev = seed;
    for i in period..values.len() {
        prev = (values[i] - prev) * k + prev;
        out[i] = prev;
    }
    out
}

/// MACD decomposition (12/26/9 by convention).
#[derive(Debug, Clone)]
pub struct Macd {
    pub macd_line: Vec<f64>,
    pub signal_line: Vec<f64>,
    pub histogram: Vec<f64>,
}

/// MACD with the standard 12/26/9 parameters.
pub fn macd(values: &[f64]) -> Macd {
    let fast = ema(values, 12);
    let slow = ema(values, 26);

    let macd_line: Vec<f64> = fast
        .iter()
        .zip(slow.iter())
        .map(|(f, s)| f - s)
        .collect();

    // The signal EMA runs over the finite region of the MACD line only.
    let first_finite = macd_line.iter().position(|v| v.is_finite());
    let mut signal_line = vec![f64::NAN; values.len()];
    if let Some(start) = first_finite {
        let finite_signal = ema(&macd_line[start..], 9);
        for (i, v) in finite_signal.into_iter().enumerate() {
            signal_line[start + i] = v;
        }
    }

    let histogram: Vec<f64> = macd_line
        .iter()
        .zip(signal_line.iter())
        .map(|(m, s)| m - s)
        .collect();

    Macd {
        macd_line,
        signal_line,
        histogram,
    }
}

/// Relative strength index with Wilder smoothing.
///
/// `out[i]` is defined for `i >= period`; earlier slots are NaN.
pub fn rsi(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 || values.len() <= period {
        return out;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let delta = values[i] - values[i - 1];
        if delta > 0.0 {
            avg_gain += delta;
        } else {
            avg_loss += -delta;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    out[period] = rsi_value(avg_gain, avg_loss);

    for i in (period + 1)..values.len() {
        let delta = values[i] - values[i - 1];
        let (gain, loss) = if delta > 0.0 { (delta, 0.0) } else { (0.0, -delta) };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        out[i] = rsi_value(avg_gain, avg_loss);
    }
    out
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
}

/// Average true range with Wilder smoothing.
///
/// `out[i]` is defined for `i >= period`; earlier slots are NaN.
pub fn atr(klines: &[Kline], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; klines.len()];
    if period == 0 || klines.len() <= period {
        return out;
    }

    let true_range = |i: usize| -> f64 {
        let k = &klines[i];
        if i == 0 {
            return k.high - k.low;
        }
        let prev_close = klines[i - 1].close;
        (k.high - k.low)
            .max((k.high - prev_close).abs())
            .max((k.low - prev_close).abs())
    };

    let seed: f64 = (1..=period).map(true_range).sum::<f64>() / period as f64;
    out[period] = seed;

    let mut prev = seed;
    for i in (period + 1)..klines.len() {
        prev = (prev * (period as f64 - 1.0) + true_range(i)) / period as f64;
        out[i] = prev;
    }
    out
}

/// Last finite value of a series, or NaN if none.
pub fn last_finite(series: &[f64]) -> f64 {
    series
        .iter()
        .rev()
        .copied()
        .find(|v| v.is_finite())
        .unwrap_or(f64::NAN)
}
