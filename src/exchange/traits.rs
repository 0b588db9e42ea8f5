//! The abstract exchange operations the agent depends on.
//!
//! Concrete venue REST drivers live outside the core; they must honor the
//! guarantees stated here: quantity/price formatting rounds to the venue's
//! lot/tick, open/close are effectively idempotent when preceded by
//! `cancel_all_orders` on the same symbol within a cycle, reduce-only flags
//! are honored on closes and brackets, and the balance/position reads may be
//! cached briefly but must expose invalidation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{PositionInfo, PositionSide};
use crate::error::Result;

/// Raw balance figures as the venue reports them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub total_equity: f64,
    pub available_balance: f64,
    pub unrealized_pnl: f64,
    pub margin_used: f64,
}

/// Acknowledgement of a filled (or partially filled) order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub filled_quantity: f64,
    pub avg_price: f64,
}

/// Per-contract precision and sizing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractSpec {
    pub symbol: String,
    /// Minimum order size, in contracts.
    pub order_size_min: f64,
    /// Base units per contract.
    pub quote_multiplier: f64,
    /// Price tick size.
    pub price_tick: f64,
}

impl ContractSpec {
    /// A permissive spec for venues without meaningful contract metadata.
    pub fn unit(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            order_size_min: 1.0,
            quote_multiplier: 0.000_001,
            price_tick: 0.0001,
        }
    }

    /// Round a base quantity to a whole number of contracts, respecting the
    /// venue minimum. Returns the quantized base quantity.
    pub fn quantize_quantity(&self, base_qty: f64) -> f64 {
        if self.quote_multiplier <= 0.0 {
            return base_qty;
        }
        let mut contracts = (base_qty / self.quote_multiplier + 0.5).floor();
        if contracts < self.order_size_min {
            contracts = self.order_size_min;
        }
        contracts * self.quote_multiplier
    }

    /// Round a price to the venue tick.
    pub fn quantize_price(&self, price: f64) -> f64 {
        if self.price_tick <= 0.0 {
            return price;
        }
        (price / self.price_tick + 0.5).floor() * self.price_tick
    }

    pub fn format_quantity(&self, base_qty: f64) -> String {
        format!("{:.6}", self.quantize_quantity(base_qty))
    }

    pub fn format_price(&self, price: f64) -> String {
        let rounded = self.quantize_price(price);
        format!("{:.*}", decimals_for(self.price_tick), rounded)
    }
}

fn decimals_for(tick: f64) -> usize {
    let mut decimals = 0;
    let mut t = tick;
    while t > 0.0 && t < 1.0 && decimals < 10 {
        t *= 10.0;
        decimals += 1;
    }
    decimals
}

/// Abstract exchange operations. All methods take `&self`; implementations
/// guard their own caches internally.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn balance(&self) -> Result<AccountBalance>;

    /// Open positions; zero-size entries are already filtered out.
    async fn positions(&self) -> Result<Vec<PositionInfo>>;

    async fn market_price(&self, symbol: &str) -> Result<f64>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()>;

    /// Best-effort: the absence of resting orders is not an error.
    async fn cancel_all_orders(&self, symbol: &str) -> Result<()>;

    async fn open_long(&self, symbol: &str, base_qty: f64, leverage: u32) -> Result<OrderAck>;

    async fn open_short(&self, symbol: &str, base_qty: f64, leverage: u32) -> Result<OrderAck>;

    /// Close (reduce-only). `base_qty` of `None` closes the full position.
    async fn close_long(&self, symbol: &str, base_qty: Option<f64>) -> Result<OrderAck>;

    async fn close_short(&self, symbol: &str, base_qty: Option<f64>) -> Result<OrderAck>;

    /// Reduce-only price-triggered stop loss sized to `quantity`.
    async fn set_stop_loss(
        &self,
        symbol: &str,
        side: PositionSide,
        quantity: f64,
        price: f64,
    ) -> Result<()>;

    /// Reduce-only price-triggered take profit sized to `quantity`.
    async fn set_take_profit(
        &self,
        symbol: &str,
        side: PositionSide,
        quantity: f64,
        price: f64,
    ) -> Result<()>;

    async fn contract_spec(&self, symbol: &str) -> Result<ContractSpec>;

    /// Drop any cached balance/position state after a mutating call.
    async fn invalidate_caches(&self);

    async fn format_quantity(&self, symbol: &str, qty: f64) -> Result<String> {
        Ok(self.contract_spec(symbol).await?.format_quantity(qty))
    }

    async fn format_price(&self, symbol: &str, price: f64) -> Result<String> {
        Ok(self.contract_spec(symbol).await?.format_price(price))
    }
}
