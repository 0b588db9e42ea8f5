//! Canonical account and position projection over the exchange adapter.

use std::sync::Arc;

use crate::domain::{AccountInfo, PositionInfo};
use crate::error::Result;
use crate::exchange::ExchangeAdapter;

/// Projects raw adapter reads into the canonical account/position shapes.
///
/// The exchange stays the source of truth; the projector only derives
/// percentages and filters residue. Short-window caching lives inside the
/// adapter, which must invalidate on every mutating call.
pub struct AccountProjector {
    adapter: Arc<dyn ExchangeAdapter>,
    initial_balance: f64,
}

impl AccountProjector {
    pub fn new(adapter: Arc<dyn ExchangeAdapter>, initial_balance: f64) -> Self {
        Self {
            adapter,
            initial_balance,
        }
    }

    pub async fn account(&self) -> Result<AccountInfo> {
        let balance = self.adapter.balance().await?;
        let positions = self.positions().await?;

        let total_pnl = balance.total_equity - self.initial_balance;
        let total_pnl_pct = if self.initial_balance > 0.0 {
            total_pnl / self.initial_balance * 100.0
        } else {
            0.0
        };
        let margin_used_pct = if balance.total_equity > 0.0 {
            balance.margin_used / balance.total_equity * 100.0
        } else {
            0.0
        };

        Ok(AccountInfo {
            total_equity: balance.total_equity,
            available_balance: balance.available_balance,
            total_pnl,
            total_pnl_pct,
            margin_used: balance.margin_used,
            margin_used_pct,
            position_count: positions.len(),
        })
    }

    pub async fn positions(&self) -> Result<Vec<PositionInfo>> {
        let positions = self.adapter.positions().await?;
        Ok(positions
            .into_iter()
            .filter(|p| p.quantity > 0.0)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::PaperExchange;

    #[tokio::test]
    async fn derives_pnl_and_margin_percentages() {
        let exchange = Arc::new(PaperExchange::new(1000.0));
        exchange.set_price("BTCUSDT", 100.0).await;
        exchange.open_long("BTCUSDT", 5.0, 5).await.unwrap();
        exchange.set_price("BTCUSDT", 120.0).await;

        let projector = AccountProjector::new(exchange, 1000.0);
        let account = projector.account().await.unwrap();

        // Entry at the 1% IOC bound (101); 5 units, +19 each -> +95 unrealized
        assert!((account.total_equity - 1095.0).abs() < 1e-6);
        assert!((account.total_pnl - 95.0).abs() < 1e-6);
        assert!((account.total_pnl_pct - 9.5).abs() < 1e-6);
        // margin = 101*5/5 = 101 -> 101/1095
        assert!((account.margin_used_pct - 101.0 / 1095.0 * 100.0).abs() < 1e-6);
        assert_eq!(account.position_count, 1);
    }

    #[tokio::test]
    async fn flat_account_reads_clean() {
        let exchange = Arc::new(PaperExchange::new(500.0));
        let projector = AccountProjector::new(exchange, 500.0);
        let account = projector.account().await.unwrap();
        assert_eq!(account.position_count, 0);
        assert_eq!(account.total_pnl, 0.0);
        assert_eq!(account.margin_used, 0.0);
    }
}
