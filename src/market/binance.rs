//! Binance USDT-margined futures market data driver.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::{Kline, OpenInterest};
use crate::error::{GauntletError, Result};

const DEFAULT_BASE_URL: &str = "https://fapi.binance.com";
const REQUEST_TIMEOUT_SECS: u64 = 30;

pub struct BinanceFuturesProvider {
    base_url: String,
    http: reqwest::Client,
}

impl BinanceFuturesProvider {
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            http,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GauntletError::MarketData(format!(
                "binance API error (status {status}): {body}"
            )));
        }
        Ok(resp.json::<T>().await?)
    }
}

#[derive(Debug, Deserialize)]
struct OpenInterestResponse {
    #[serde(rename = "openInterest")]
    open_interest: String,
}

#[derive(Debug, Deserialize)]
struct PremiumIndexResponse {
    #[serde(rename = "lastFundingRate")]
    last_funding_rate: String,
}

fn field_f64(value: &serde_json::Value) -> f64 {
    match value {
        serde_json::Value::String(s) => s.parse().unwrap_or(0.0),
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

#[async_trait]
impl crate::market::MarketDataProvider for BinanceFuturesProvider {
    fn name(&self) -> &str {
        "binance"
    }

    async fn klines(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Kline>> {
        let symbol = self.normalize_symbol(symbol);
        let url = format!(
            "{}/fapi/v1/klines?symbol={symbol}&interval={interval}&limit={limit}",
            self.base_url
        );

        // Binance returns rows of mixed-type arrays:
        // [open_time, open, high, low, close, volume, close_time, ...]
        let raw: Vec<Vec<serde_json::Value>> = self.get_json(&url).await?;

        let mut klines = Vec::with_capacity(raw.len());
        for row in raw {
            if row.len() < 7 {
                return Err(GauntletError::MarketData(format!(
                    "binance kline row too short for {symbol}"
                )));
            }
            klines.push(Kline {
                open_time_ms: row[0].as_i64().unwrap_or(0),
                open: field_f64(&row[1]),
                high: field_f64(&row[2]),
                low: field_f64(&row[3]),
                close: field_f64(&row[4]),
                volume: field_f64(&row[5]),
                close_time_ms: row[6].as_i64().unwrap_or(0),
            });
        }
        Ok(klines)
    }

    async fn open_interest(&self, symbol: &str) -> Result<Option<OpenInterest>> {
        let symbol = self.normalize_symbol(symbol);
        let url = format!("{}/fapi/v1/openInterest?symbol={symbol}", self.base_url);
        let resp: OpenInterestResponse = self.get_json(&url).await?;
        let latest: f64 = resp.open_interest.parse().unwrap_or(0.0);
        Ok(Some(OpenInterest::from_latest(latest)))
    }

    async fn funding_rate(&self, symbol: &str) -> Result<Option<f64>> {
        let symbol = self.normalize_symbol(symbol);
        let url = format!("{}/fapi/v1/premiumIndex?symbol={symbol}", self.base_url);
        let resp: PremiumIndexResponse = self.get_json(&url).await?;
        Ok(Some(resp.last_funding_rate.parse().unwrap_or(0.0)))
    }
}
