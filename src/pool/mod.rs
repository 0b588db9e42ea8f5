//! Candidate-pool sourcing: the symbols an agent may consider beyond its
//! open positions.
//!
//! Two upstream feeds are supported (an AI500 scoring pool and an
//! open-interest growth leaderboard), unioned with provenance tags. Feed
//! failures degrade to the configured static list; the pool never fails a
//! cycle.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::{CandidateCoin, CandidateSource};

const FETCH_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Default)]
pub struct PoolConfig {
    pub use_default_coins: bool,
    pub default_coins: Vec<String>,
    pub coin_pool_api_url: Option<String>,
    pub oi_top_api_url: Option<String>,
}

pub struct CandidatePool {
    config: PoolConfig,
    http: reqwest::Client,
}

impl CandidatePool {
    pub fn new(config: PoolConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self { config, http }
    }

    /// The current candidate set. Position symbols are merged in by the
    /// caller; this is only the external pool.
    pub async fn candidates(&self) -> Vec<CandidateCoin> {
        let mut coins: Vec<CandidateCoin> = Vec::new();

        if self.config.use_default_coins {
            for symbol in &self.config.default_coins {
                push_tagged(&mut coins, symbol, CandidateSource::Ai500);
            }
        }

        if let Some(url) = &self.config.coin_pool_api_url {
            match self.fetch_symbols(url).await {
                Ok(symbols) => {
                    for symbol in symbols {
                        push_tagged(&mut coins, &symbol, CandidateSource::Ai500);
                    }
                }
                Err(e) => warn!(error = %e, "AI500 pool fetch failed"),
            }
        }

        if let Some(url) = &self.config.oi_top_api_url {
            match self.fetch_symbols(url).await {
                Ok(symbols) => {
                    for symbol in symbols {
                        push_tagged(&mut coins, &symbol, CandidateSource::OiTop);
                    }
                }
                Err(e) => warn!(error = %e, "OI-top pool fetch failed"),
            }
        }

        debug!(count = coins.len(), "candidate pool assembled");
        coins
    }

    async fn fetch_symbols(&self, url: &str) -> crate::error::Result<Vec<String>> {
        let body: Value = self.http.get(url).send().await?.json().await?;
        Ok(extract_symbols(&body))
    }
}

fn push_tagged(coins: &mut Vec<CandidateCoin>, symbol: &str, source: CandidateSource) {
    let symbol = symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return;
    }
    if let Some(existing) = coins.iter_mut().find(|c| c.symbol == symbol) {
        existing.merge_source(source);
    } else {
        coins.push(CandidateCoin::new(symbol, source));
    }
}

/// Pull symbol strings out of the common feed shapes:
/// a bare string array, `{"symbols": [...]}`, or `{"data": [{"symbol": ...}]}`.
fn extract_symbols(body: &Value) -> Vec<String> {
    let items = match body {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => map
            .get("symbols")
            .or_else(|| map.get("data"))
            .or_else(|| map.get("coins"))
            .and_then(Value::as_array)
            .map(|v| v.as_slice())
            .unwrap_or(&[]),
        _ => &[],
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => obj
                .get("symbol")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_list_is_tagged_ai500() {
        let pool = CandidatePool::new(PoolConfig {
            use_default_coins: true,
            default_coins: vec!["btcusdt".into(), "ETHUSDT".into()],
            coin_pool_api_url: None,
            oi_top_api_url: None,
        });

        let coins = pool.candidates().await;
        assert_eq!(coins.len(), 2);
        assert_eq!(coins[0].symbol, "BTCUSDT");
        assert_eq!(coins[0].sources, vec![CandidateSource::Ai500]);
    }

    #[test]
    fn duplicate_symbols_union_their_sources() {
        let mut coins = Vec::new();
        push_tagged(&mut coins, "BTCUSDT", CandidateSource::Ai500);
        push_tagged(&mut coins, "BTCUSDT", CandidateSource::OiTop);
        assert_eq!(coins.len(), 1);
        assert!(coins[0].is_double_signal());
    }

    #[test]
    fn extract_symbols_handles_all_feed_shapes() {
        let bare = serde_json::json!(["BTCUSDT", "ETHUSDT"]);
        assert_eq!(extract_symbols(&bare), vec!["BTCUSDT", "ETHUSDT"]);

        let keyed = serde_json::json!({"symbols": ["SOLUSDT"]});
        assert_eq!(extract_symbols(&keyed), vec!["SOLUSDT"]);

        let objects = serde_json::json!({"data": [{"symbol": "XRPUSDT", "rank": 1}]});
        assert_eq!(extract_symbols(&objects), vec!["XRPUSDT"]);

        let junk = serde_json::json!({"unrelated": true});
        assert!(extract_symbols(&junk).is_empty());
    }
}
