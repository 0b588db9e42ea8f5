use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::domain::{is_ordered_series, Kline, MarketSnapshot, TimeframeSeries};
use crate::error::{GauntletError, Result};
use crate::indicators;

use super::provider::{MarketDataProvider, ProviderRegistry};

/// Short-horizon bars used for intraday context.
const INTRADAY_INTERVAL: &str = "3m";
const INTRADAY_LIMIT: usize = 40;
/// Long-horizon bars used for trend context.
const LONG_TERM_INTERVAL: &str = "4h";
const LONG_TERM_LIMIT: usize = 60;
/// Intraday bars per hour at the 3m interval.
const BARS_PER_HOUR: usize = 20;

/// Assembles immutable per-symbol snapshots through the provider registry.
pub struct SnapshotAssembler {
    registry: Arc<ProviderRegistry>,
}

impl SnapshotAssembler {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    /// Assemble a snapshot using the registry's default provider.
    pub async fn snapshot(&self, symbol: &str) -> Result<MarketSnapshot> {
        let provider = self.registry.default_provider()?;
        self.snapshot_with(provider.as_ref(), symbol).await
    }

    /// Assemble a snapshot using a specific provider.
    pub async fn snapshot_with(
        &self,
        provider: &dyn MarketDataProvider,
        symbol: &str,
    ) -> Result<MarketSnapshot> {
        let intraday_klines = provider
            .klines(symbol, INTRADAY_INTERVAL, INTRADAY_LIMIT)
            .await?;
        let long_klines = provider
            .klines(symbol, LONG_TERM_INTERVAL, LONG_TERM_LIMIT)
            .await?;

        if intraday_klines.is_empty() {
            return Err(GauntletError::MarketData(format!(
                "{symbol}: empty {INTRADAY_INTERVAL} series"
            )));
        }
        if !is_ordered_series(&intraday_klines) || !is_ordered_series(&long_klines) {
            return Err(GauntletError::MarketData(format!(
                "{symbol}: unordered or malformed kline series"
            )));
        }

        let current_price = intraday_klines
            .last()
            .map(|k| k.close)
            .unwrap_or(f64::NAN);

        // OI and funding are best-effort: unsupported or failing lookups are
        // omitted, never fatal for the symbol.
        let open_interest = match provider.open_interest(symbol).await {
            Ok(oi) => oi,
            Err(e) => {
                debug!(symbol, error = %e, "open interest unavailable");
                None
            }
        };
        let funding_rate = match provider.funding_rate(symbol).await {
            Ok(rate) => rate,
            Err(e) => {
                debug!(symbol, error = %e, "funding rate unavailable");
                None
            }
        };

        Ok(MarketSnapshot {
            symbol: symbol.to_string(),
            current_price,
            price_change_1h: change_over(&intraday_klines, BARS_PER_HOUR),
            price_change_4h: change_over(&long_klines, 1),
            intraday: derive_series(INTRADAY_INTERVAL, intraday_klines),
            longer_term: derive_series(LONG_TERM_INTERVAL, long_klines),
            open_interest,
            funding_rate,
            captured_at: Utc::now(),
        })
    }
}

/// Percent change between the latest close and the close `bars_back` earlier.
fn change_over(klines: &[Kline], bars_back: usize) -> f64 {
    if klines.len() <= bars_back {
        return 0.0;
    }
    let latest = klines[klines.len() - 1].close;
    let past = klines[klines.len() - 1 - bars_back].close;
    if past == 0.0 {
        return 0.0;
    }
    (latest / past - 1.0) * 100.0
}

fn derive_series(interval: &str, klines: Vec<Kline>) -> TimeframeSeries {
    let closes: Vec<f64> = klines.iter().map(|k| k.close).collect();
    let atr_series = indicators::atr(&klines, 14);

    TimeframeSeries {
        interval: interval.to_string(),
        ema20: indicators::ema(&closes, 20),
        macd_histogram: indicators::macd(&closes).histogram,
        rsi7: indicators::rsi(&closes, 7),
        rsi14: indicators::rsi(&closes, 14),
        atr14: indicators::last_finite(&atr_series),
        klines,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OpenInterest;
    use async_trait::async_trait;

    struct CannedProvider {
        closes_3m: Vec<f64>,
        closes_4h: Vec<f64>,
        oi: Option<OpenInterest>,
    }

    fn bars(closes: &[f64], step_ms: i64) -> Vec<Kline> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Kline {
                open_time_ms: i as i64 * step_ms,
                open: c,
                high: c * 1.01,
                low: c * 0.99,
                close: c,
                volume: 10.0,
                close_time_ms: i as i64 * step_ms + step_ms,
            })
            .collect()
    }

    #[async_trait]
    impl MarketDataProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        async fn klines(&self, _symbol: &str, interval: &str, _limit: usize) -> Result<Vec<Kline>> {
            match interval {
                "3m" => Ok(bars(&self.closes_3m, 180_000)),
                "4h" => Ok(bars(&self.closes_4h, 14_400_000)),
                other => Err(GauntletError::MarketData(format!("interval {other}"))),
            }
        }

        async fn open_interest(&self, _symbol: &str) -> Result<Option<OpenInterest>> {
            Ok(self.oi)
        }
    }

    fn registry_with(provider: CannedProvider) -> Arc<ProviderRegistry> {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register("canned", Arc::new(provider));
        registry.set_default("canned").unwrap();
        registry
    }

    #[tokio::test]
    async fn snapshot_carries_price_changes_and_series() {
        let closes_3m: Vec<f64> = (0..40).map(|i| 100.0 + i as f64 * 0.5).collect();
        let closes_4h: Vec<f64> = (0..60).map(|i| 90.0 + i as f64).collect();
        let registry = registry_with(CannedProvider {
            closes_3m,
            closes_4h,
            oi: Some(OpenInterest::from_latest(500_000.0)),
        });

        let assembler = SnapshotAssembler::new(registry);
        let snap = assembler.snapshot("BTCUSDT").await.unwrap();

        assert_eq!(snap.symbol, "BTCUSDT");
        assert_eq!(snap.current_price, 100.0 + 39.0 * 0.5);
        // 1h change: 20 bars back -> close 100 + 19*0.5 = 109.5 vs 119.5
        let expected_1h = (119.5 / 109.5 - 1.0) * 100.0;
        assert!((snap.price_change_1h - expected_1h).abs() < 1e-9);
        // 4h change: one long bar back -> 149 vs 148
        let expected_4h = (149.0 / 148.0 - 1.0) * 100.0;
        assert!((snap.price_change_4h - expected_4h).abs() < 1e-9);

        assert_eq!(snap.intraday.klines.len(), 40);
        assert_eq!(snap.intraday.ema20.len(), 40);
        assert!(snap.current_ema20().is_finite());
        assert!(snap.current_rsi14().is_finite());
        assert!(snap.oi_value_usd().is_some());
    }

    #[tokio::test]
    async fn empty_intraday_series_is_an_error() {
        let registry = registry_with(CannedProvider {
            closes_3m: Vec::new(),
            closes_4h: vec![100.0; 60],
            oi: None,
        });
        let assembler = SnapshotAssembler::new(registry);
        assert!(assembler.snapshot("XYZUSDT").await.is_err());
    }

    #[tokio::test]
    async fn missing_oi_is_omitted_not_fatal() {
        let registry = registry_with(CannedProvider {
            closes_3m: vec![100.0; 40],
            closes_4h: vec![100.0; 60],
            oi: None,
        });
        let assembler = SnapshotAssembler::new(registry);
        let snap = assembler.snapshot("ABCUSDT").await.unwrap();
        assert!(snap.open_interest.is_none());
        assert!(snap.oi_value_usd().is_none());
    }
}
