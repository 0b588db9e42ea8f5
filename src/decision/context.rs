use std::collections::HashMap;

use crate::domain::{AccountInfo, CandidateCoin, MarketSnapshot, PositionInfo};

/// Equity multiple capping BTC/ETH position value in the fallback bound.
const BTC_ETH_SIZE_MULT: f64 = 10.0;

/// Numeric policy substituted into the system prompt and enforced by the
/// validator and executor. BTC and ETH get their own leverage cap and size
/// multiple.
#[derive(Debug, Clone, Copy)]
pub struct TradingLimits {
    pub btc_eth_leverage: u32,
    pub altcoin_leverage: u32,
    /// 0 disables the bound.
    pub min_position_size_usd: f64,
    /// 0 disables the bound.
    pub max_position_size_usd: f64,
    /// Equity multiple capping altcoin position value when no USD bound is
    /// configured; majors keep the fixed BTC/ETH multiple.
    pub max_position_size_mult: f64,
    /// Ceiling on projected margin usage, as a percent of equity.
    pub max_margin_usage_pct: f64,
}

impl TradingLimits {
    /// Symbols that get the major-pair leverage cap and size multiple.
    pub fn is_major(symbol: &str) -> bool {
        symbol == "BTCUSDT" || symbol == "ETHUSDT"
    }

    pub fn leverage_cap(&self, symbol: &str) -> u32 {
        if Self::is_major(symbol) {
            self.btc_eth_leverage
        } else {
            self.altcoin_leverage
        }
    }

    /// Equity-multiple fallback used when no explicit USD bound is configured.
    pub fn size_multiple(&self, symbol: &str) -> f64 {
        if Self::is_major(symbol) {
            BTC_ETH_SIZE_MULT
        } else {
            self.max_position_size_mult
        }
    }
}

impl Default for TradingLimits {
    fn default() -> Self {
        Self {
            btc_eth_leverage: 10,
            altcoin_leverage: 5,
            min_position_size_usd: 0.0,
            max_position_size_usd: 0.0,
            max_position_size_mult: 1.5,
            max_margin_usage_pct: 90.0,
        }
    }
}

/// Everything the prompt builder sees for one cycle.
#[derive(Debug, Clone)]
pub struct DecisionContext {
    pub current_time: String,
    pub cycle_number: u64,
    pub runtime_minutes: i64,
    pub account: AccountInfo,
    pub positions: Vec<PositionInfo>,
    pub candidates: Vec<CandidateCoin>,
    pub snapshots: HashMap<String, MarketSnapshot>,
    /// Rolling Sharpe ratio, when enough history exists. The only
    /// performance figure surfaced at this layer.
    pub sharpe_ratio: Option<f64>,
    pub limits: TradingLimits,
    /// Named system-prompt template override.
    pub template: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leverage_cap_splits_majors_from_altcoins() {
        let limits = TradingLimits {
            btc_eth_leverage: 20,
            altcoin_leverage: 5,
            ..Default::default()
        };
        assert_eq!(limits.leverage_cap("BTCUSDT"), 20);
        assert_eq!(limits.leverage_cap("ETHUSDT"), 20);
        assert_eq!(limits.leverage_cap("SOLUSDT"), 5);
    }

    #[test]
    fn size_multiple_reads_configured_altcoin_mult_and_fixed_major_mult() {
        let limits = TradingLimits {
            max_position_size_mult: 3.0,
            ..Default::default()
        };
        assert_eq!(limits.size_multiple("BTCUSDT"), 10.0);
        assert_eq!(limits.size_multiple("DOGEUSDT"), 3.0);

        let defaults = TradingLimits::default();
        assert_eq!(defaults.size_multiple("SOLUSDT"), 1.5);
    }
}
