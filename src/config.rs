use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::decision::TradingLimits;
use crate::error::Result;
use crate::pool::PoolConfig;
use crate::trader::{AgentConfig, ExecutionPolicy, RiskLimits};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub traders: Vec<TraderConfig>,

    #[serde(default)]
    pub leverage: LeverageConfig,

    #[serde(default)]
    pub position_size: PositionSizeConfig,

    /// Daily loss cap in percent of day-start equity.
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: f64,
    /// Drawdown cap in percent of peak equity.
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown: f64,
    /// Halt window after a risk gate trips.
    #[serde(default = "default_stop_trading_minutes")]
    pub stop_trading_minutes: u64,

    /// Default market data provider name.
    #[serde(default = "default_provider")]
    pub market_data_provider: String,

    #[serde(default = "default_retention_days")]
    pub decision_log_retention_days: i64,
    #[serde(default = "default_cleanup_interval_hours")]
    pub decision_log_cleanup_interval_hours: u64,

    // Candidate-pool wiring
    #[serde(default)]
    pub use_default_coins: bool,
    #[serde(default)]
    pub default_coins: Vec<String>,
    #[serde(default)]
    pub coin_pool_api_url: Option<String>,
    #[serde(default)]
    pub oi_top_api_url: Option<String>,

    #[serde(default = "default_api_port")]
    pub api_server_port: u16,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TraderConfig {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Display label of the model driving this trader.
    pub ai_model: String,
    /// LLM endpoint (dialect detected from the URL shape).
    pub api_url: String,
    pub api_key: String,
    pub model_name: String,
    /// Exchange adapter selection. `paper` runs against the in-process
    /// simulator; venue drivers register under their own names.
    #[serde(default = "default_exchange")]
    pub exchange: String,
    pub initial_balance: f64,
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    #[serde(default)]
    pub system_prompt_template: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LeverageConfig {
    #[serde(default = "default_btc_eth_leverage")]
    pub btc_eth: u32,
    #[serde(default = "default_altcoin_leverage")]
    pub altcoin: u32,
}

impl Default for LeverageConfig {
    fn default() -> Self {
        Self {
            btc_eth: default_btc_eth_leverage(),
            altcoin: default_altcoin_leverage(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PositionSizeConfig {
    /// 0 disables the bound.
    #[serde(default)]
    pub min_usd: f64,
    /// 0 disables the bound.
    #[serde(default)]
    pub max_usd: f64,
    #[serde(default = "default_max_margin_usage_pct")]
    pub max_margin_usage_pct: f64,
    #[serde(default = "default_max_position_size_mult")]
    pub max_position_size_mult: f64,
    #[serde(default)]
    pub safety_buffer_pct: f64,
    #[serde(default)]
    pub check_available_before_open: bool,
}

impl Default for PositionSizeConfig {
    fn default() -> Self {
        Self {
            min_usd: 0.0,
            max_usd: 0.0,
            max_margin_usage_pct: default_max_margin_usage_pct(),
            max_position_size_mult: default_max_position_size_mult(),
            safety_buffer_pct: 0.0,
            check_available_before_open: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_daily_loss() -> f64 {
    10.0
}

fn default_max_drawdown() -> f64 {
    20.0
}

fn default_stop_trading_minutes() -> u64 {
    60
}

fn default_provider() -> String {
    "binance".to_string()
}

fn default_retention_days() -> i64 {
    30
}

fn default_cleanup_interval_hours() -> u64 {
    24
}

fn default_api_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_exchange() -> String {
    "paper".to_string()
}

fn default_scan_interval_secs() -> u64 {
    180
}

fn default_btc_eth_leverage() -> u32 {
    10
}

fn default_altcoin_leverage() -> u32 {
    5
}

fn default_max_margin_usage_pct() -> f64 {
    90.0
}

fn default_max_position_size_mult() -> f64 {
    1.5
}

impl AppConfig {
    /// Load from a file with `GAUNTLET__`-prefixed environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("GAUNTLET").separator("__"))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Validate config invariants. Returns list of problems (empty = valid).
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let enabled: Vec<&TraderConfig> = self.traders.iter().filter(|t| t.enabled).collect();
        if enabled.is_empty() {
            errors.push("no enabled traders configured".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for trader in &self.traders {
            if trader.id.trim().is_empty() {
                errors.push("trader id must not be empty".to_string());
            } else if !seen.insert(trader.id.clone()) {
                errors.push(format!("duplicate trader id '{}'", trader.id));
            }
            if trader.enabled && trader.initial_balance <= 0.0 {
                errors.push(format!(
                    "trader '{}': initial_balance must be > 0, got {}",
                    trader.id, trader.initial_balance
                ));
            }
            if trader.enabled && trader.scan_interval_secs == 0 {
                errors.push(format!("trader '{}': scan_interval_secs must be > 0", trader.id));
            }
        }

        if self.leverage.btc_eth == 0 || self.leverage.altcoin == 0 {
            errors.push("leverage caps must be >= 1".to_string());
        }
        if self.max_daily_loss <= 0.0 || self.max_daily_loss >= 100.0 {
            errors.push(format!(
                "max_daily_loss must be in (0, 100), got {}",
                self.max_daily_loss
            ));
        }
        if self.max_drawdown <= 0.0 || self.max_drawdown >= 100.0 {
            errors.push(format!(
                "max_drawdown must be in (0, 100), got {}",
                self.max_drawdown
            ));
        }
        if self.position_size.min_usd > 0.0
            && self.position_size.max_usd > 0.0
            && self.position_size.min_usd > self.position_size.max_usd
        {
            errors.push("position_size.min_usd exceeds max_usd".to_string());
        }
        if self.position_size.max_margin_usage_pct <= 0.0
            || self.position_size.max_margin_usage_pct > 100.0
        {
            errors.push(format!(
                "position_size.max_margin_usage_pct must be in (0, 100], got {}",
                self.position_size.max_margin_usage_pct
            ));
        }
        if self.position_size.max_position_size_mult <= 0.0 {
            errors.push(format!(
                "position_size.max_position_size_mult must be > 0, got {}",
                self.position_size.max_position_size_mult
            ));
        }
        if self.decision_log_retention_days <= 0 {
            errors.push("decision_log_retention_days must be >= 1".to_string());
        }

        errors
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            use_default_coins: self.use_default_coins,
            default_coins: self.default_coins.clone(),
            coin_pool_api_url: self.coin_pool_api_url.clone(),
            oi_top_api_url: self.oi_top_api_url.clone(),
        }
    }

    pub fn trading_limits(&self) -> TradingLimits {
        TradingLimits {
            btc_eth_leverage: self.leverage.btc_eth,
            altcoin_leverage: self.leverage.altcoin,
            min_position_size_usd: self.position_size.min_usd,
            max_position_size_usd: self.position_size.max_usd,
            max_position_size_mult: self.position_size.max_position_size_mult,
            max_margin_usage_pct: self.position_size.max_margin_usage_pct,
        }
    }

    pub fn execution_policy(&self) -> ExecutionPolicy {
        ExecutionPolicy {
            safety_buffer_pct: self.position_size.safety_buffer_pct,
            check_available_before_open: self.position_size.check_available_before_open,
        }
    }

    pub fn risk_limits(&self) -> RiskLimits {
        RiskLimits {
            max_daily_loss_pct: self.max_daily_loss,
            max_drawdown_pct: self.max_drawdown,
            stop_trading_duration: Duration::from_secs(self.stop_trading_minutes * 60),
        }
    }

    /// Assemble the per-agent config for one trader entry.
    pub fn agent_config(&self, trader: &TraderConfig) -> AgentConfig {
        AgentConfig {
            id: trader.id.clone(),
            name: trader.name.clone(),
            model_label: trader.ai_model.clone(),
            scan_interval: Duration::from_secs(trader.scan_interval_secs),
            initial_balance: trader.initial_balance,
            limits: self.trading_limits(),
            execution: self.execution_policy(),
            risk: self.risk_limits(),
            prompt_template: trader.system_prompt_template.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trader(id: &str) -> TraderConfig {
        TraderConfig {
            id: id.into(),
            name: format!("Trader {id}"),
            enabled: true,
            ai_model: "test-model".into(),
            api_url: "https://api.example.com/v1".into(),
            api_key: "k".into(),
            model_name: "m".into(),
            exchange: "paper".into(),
            initial_balance: 1000.0,
            scan_interval_secs: 180,
            system_prompt_template: None,
        }
    }

    fn base_config() -> AppConfig {
        AppConfig {
            traders: vec![trader("a")],
            leverage: LeverageConfig::default(),
            position_size: PositionSizeConfig::default(),
            max_daily_loss: 10.0,
            max_drawdown: 20.0,
            stop_trading_minutes: 60,
            market_data_provider: "binance".into(),
            decision_log_retention_days: 30,
            decision_log_cleanup_interval_hours: 24,
            use_default_coins: true,
            default_coins: vec!["BTCUSDT".into()],
            coin_pool_api_url: None,
            oi_top_api_url: None,
            api_server_port: 8080,
            data_dir: PathBuf::from("data"),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_empty());
    }

    #[test]
    fn duplicate_trader_ids_are_flagged() {
        let mut cfg = base_config();
        cfg.traders.push(trader("a"));
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.contains("duplicate trader id")));
    }

    #[test]
    fn no_enabled_traders_is_flagged() {
        let mut cfg = base_config();
        cfg.traders[0].enabled = false;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.contains("no enabled traders")));
    }

    #[test]
    fn out_of_range_risk_caps_are_flagged() {
        let mut cfg = base_config();
        cfg.max_drawdown = 150.0;
        cfg.max_daily_loss = 0.0;
        let errors = cfg.validate();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn inverted_size_bounds_are_flagged() {
        let mut cfg = base_config();
        cfg.position_size.min_usd = 500.0;
        cfg.position_size.max_usd = 100.0;
        assert!(cfg.validate().iter().any(|e| e.contains("min_usd exceeds")));
    }

    #[test]
    fn agent_config_carries_policy_through() {
        let mut cfg = base_config();
        cfg.position_size.max_position_size_mult = 3.0;
        cfg.position_size.max_margin_usage_pct = 75.0;

        let agent_cfg = cfg.agent_config(&cfg.traders[0]);
        assert_eq!(agent_cfg.id, "a");
        assert_eq!(agent_cfg.scan_interval, Duration::from_secs(180));
        assert_eq!(agent_cfg.limits.btc_eth_leverage, 10);
        assert_eq!(agent_cfg.limits.max_position_size_mult, 3.0);
        assert_eq!(agent_cfg.limits.max_margin_usage_pct, 75.0);
        assert_eq!(agent_cfg.risk.stop_trading_duration, Duration::from_secs(3600));
    }

    #[test]
    fn out_of_range_margin_cap_is_flagged() {
        let mut cfg = base_config();
        cfg.position_size.max_margin_usage_pct = 0.0;
        assert!(cfg
            .validate()
            .iter()
            .any(|e| e.contains("max_margin_usage_pct")));

        let mut cfg = base_config();
        cfg.position_size.max_position_size_mult = -1.0;
        assert!(cfg
            .validate()
            .iter()
            .any(|e| e.contains("max_position_size_mult")));
    }
}
