pub mod account;
pub mod api;
pub mod config;
pub mod decision;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod indicators;
pub mod llm;
pub mod logger;
pub mod manager;
pub mod market;
pub mod pool;
pub mod trader;

pub use config::AppConfig;
pub use error::{GauntletError, Result};
pub use exchange::{ExchangeAdapter, PaperExchange};
pub use llm::{ChatCompleter, LlmClient, LlmConfig};
pub use manager::TraderManager;
pub use market::{MarketDataProvider, ProviderRegistry, SnapshotAssembler};
pub use trader::{Agent, AgentConfig};
