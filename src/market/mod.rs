//! Market data access: the provider seam, the registry and snapshot assembly.

mod binance;
mod format;
mod provider;
mod snapshot;

pub use binance::BinanceFuturesProvider;
pub use format::format_snapshot;
pub use provider::{MarketDataProvider, ProviderRegistry};
pub use snapshot::SnapshotAssembler;
