use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::domain::{Kline, OpenInterest};
use crate::error::{GauntletError, Result};

/// Venue-agnostic market data source.
///
/// Open interest and funding are optional: spot-only venues return `Ok(None)`
/// and the core omits the field rather than failing.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Convert a symbol to this venue's format.
    fn normalize_symbol(&self, symbol: &str) -> String {
        symbol.to_uppercase().replace(['_', '-'], "")
    }

    /// Fetch candlestick data, oldest first.
    async fn klines(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Kline>>;

    async fn open_interest(&self, _symbol: &str) -> Result<Option<OpenInterest>> {
        Ok(None)
    }

    async fn funding_rate(&self, _symbol: &str) -> Result<Option<f64>> {
        Ok(None)
    }
}

/// Name-keyed provider registry with a distinguished default.
///
/// Registration happens at startup; lookups are concurrent and read-mostly.
/// The registry is shared explicitly (`Arc`) through constructors rather than
/// living in process-global state.
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn MarketDataProvider>>>,
    default_name: RwLock<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            default_name: RwLock::new("binance".to_string()),
        }
    }

    pub fn register(&self, name: impl Into<String>, provider: Arc<dyn MarketDataProvider>) {
        self.providers
            .write()
            .expect("provider registry lock poisoned")
            .insert(name.into(), provider);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn MarketDataProvider>> {
        self.providers
            .read()
            .expect("provider registry lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| GauntletError::ProviderNotFound(name.to_string()))
    }

    /// Set the default provider; the name must already be registered.
    pub fn set_default(&self, name: &str) -> Result<()> {
        self.get(name)?;
        *self
            .default_name
            .write()
            .expect("provider registry lock poisoned") = name.to_string();
        Ok(())
    }

    pub fn default_name(&self) -> String {
        self.default_name
            .read()
            .expect("provider registry lock poisoned")
            .clone()
    }

    pub fn default_provider(&self) -> Result<Arc<dyn MarketDataProvider>> {
        self.get(&self.default_name())
    }

    pub fn names(&self) -> Vec<String> {
        self.providers
            .read()
            .expect("provider registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullProvider(&'static str);

    #[async_trait]
    impl MarketDataProvider for NullProvider {
        fn name(&self) -> &str {
            self.0
        }

        async fn klines(&self, _symbol: &str, _interval: &str, _limit: usize) -> Result<Vec<Kline>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn default_provider_must_be_registered() {
        let registry = ProviderRegistry::new();
        assert!(registry.set_default("nowhere").is_err());

        registry.register("nowhere", Arc::new(NullProvider("nowhere")));
        assert!(registry.set_default("nowhere").is_ok());
        assert_eq!(registry.default_name(), "nowhere");
    }

    #[test]
    fn lookup_of_missing_provider_errors() {
        let registry = ProviderRegistry::new();
        assert!(matches!(
            registry.get("binance"),
            Err(GauntletError::ProviderNotFound(_))
        ));
    }

    #[test]
    fn default_symbol_normalization_strips_separators() {
        let p = NullProvider("x");
        assert_eq!(p.normalize_symbol("btc_usdt"), "BTCUSDT");
        assert_eq!(p.normalize_symbol("ETH-USDT"), "ETHUSDT");
    }

    #[test]
    fn concurrent_lookups_do_not_block_each_other() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register("a", Arc::new(NullProvider("a")));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let r = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        assert!(r.get("a").is_ok());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
