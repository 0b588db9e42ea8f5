//! In-process paper-trading adapter.
//!
//! Orders are submitted as aggressive IOC limits priced 1% through the mark
//! (above it when buying, below it when selling) and fill exactly at that
//! limit. Positions and brackets live in memory, and reduce-only semantics
//! are honored. Used for dry-run operation and as the adapter in
//! integration tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::{PositionInfo, PositionSide};
use crate::error::{GauntletError, Result};

use super::traits::{AccountBalance, ContractSpec, ExchangeAdapter, OrderAck};

/// IOC limit bound relative to the mark price: buys cross 1% above, sells
/// 1% below, emulating market-style execution while staying price-bounded.
const IOC_PRICE_BAND: f64 = 0.01;

/// The bounded limit price for an order that buys (`true`) or sells.
fn ioc_limit_price(mark: f64, is_buy: bool) -> f64 {
    if is_buy {
        mark * (1.0 + IOC_PRICE_BAND)
    } else {
        mark * (1.0 - IOC_PRICE_BAND)
    }
}

#[derive(Debug, Clone)]
struct PaperPosition {
    side: PositionSide,
    entry_price: f64,
    quantity: f64,
    leverage: u32,
    opened_at_ms: i64,
}

/// A resting price-triggered bracket order (stop loss or take profit).
#[derive(Debug, Clone, PartialEq)]
pub struct BracketOrder {
    pub symbol: String,
    pub side: PositionSide,
    pub quantity: f64,
    pub trigger_price: f64,
    pub is_stop_loss: bool,
}

#[derive(Debug, Default)]
struct PaperState {
    /// Realized cash; margin is reserved, not deducted.
    cash: f64,
    positions: HashMap<String, PaperPosition>,
    brackets: Vec<BracketOrder>,
    next_order_id: u64,
}

pub struct PaperExchange {
    state: RwLock<PaperState>,
    prices: RwLock<HashMap<String, f64>>,
    specs: RwLock<HashMap<String, ContractSpec>>,
    /// Counts cache invalidations so tests can observe write-through.
    invalidations: std::sync::atomic::AtomicU64,
}

impl PaperExchange {
    pub fn new(initial_balance: f64) -> Self {
        Self {
            state: RwLock::new(PaperState {
                cash: initial_balance,
                ..Default::default()
            }),
            prices: RwLock::new(HashMap::new()),
            specs: RwLock::new(HashMap::new()),
            invalidations: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Seed or move the mark price for a symbol.
    pub async fn set_price(&self, symbol: &str, price: f64) {
        self.prices.write().await.insert(symbol.to_string(), price);
    }

    /// Override contract metadata for a symbol (defaults to a unit spec).
    pub async fn set_contract_spec(&self, spec: ContractSpec) {
        self.specs.write().await.insert(spec.symbol.clone(), spec);
    }

    /// Resting bracket orders, for inspection.
    pub async fn bracket_orders(&self) -> Vec<BracketOrder> {
        self.state.read().await.brackets.clone()
    }

    pub fn invalidation_count(&self) -> u64 {
        self.invalidations.load(std::sync::atomic::Ordering::SeqCst)
    }

    async fn price_of(&self, symbol: &str) -> Result<f64> {
        self.prices
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| GauntletError::MarketData(format!("no mark price for {symbol}")))
    }

    async fn open(
        &self,
        symbol: &str,
        side: PositionSide,
        base_qty: f64,
        leverage: u32,
    ) -> Result<OrderAck> {
        if base_qty <= 0.0 {
            return Err(GauntletError::OrderRejected(format!(
                "non-positive quantity {base_qty} for {symbol}"
            )));
        }
        let mark = self.price_of(symbol).await?;
        // Opening a long buys, opening a short sells.
        let price = ioc_limit_price(mark, side == PositionSide::Long);
        let mut state = self.state.write().await;

        let margin = price * base_qty / leverage.max(1) as f64;
        let reserved: f64 = state
            .positions
            .values()
            .map(|p| p.entry_price * p.quantity / p.leverage.max(1) as f64)
            .sum();
        if margin > state.cash - reserved {
            return Err(GauntletError::OrderRejected(format!(
                "insufficient margin for {symbol}: need {margin:.2}, free {:.2}",
                state.cash - reserved
            )));
        }

        match state.positions.get_mut(symbol) {
            Some(existing) if existing.side == side => {
                // Average into the existing position
                let total = existing.quantity + base_qty;
                existing.entry_price =
                    (existing.entry_price * existing.quantity + price * base_qty) / total;
                existing.quantity = total;
                existing.leverage = leverage;
            }
            Some(_) => {
                return Err(GauntletError::OrderRejected(format!(
                    "opposite position already open on {symbol}"
                )));
            }
            None => {
                state.positions.insert(
                    symbol.to_string(),
                    PaperPosition {
                        side,
                        entry_price: price,
                        quantity: base_qty,
                        leverage,
                        opened_at_ms: Utc::now().timestamp_millis(),
                    },
                );
            }
        }

        state.next_order_id += 1;
        let order_id = format!("paper-{}", state.next_order_id);
        debug!(symbol, ?side, qty = base_qty, price, "paper fill");
        Ok(OrderAck {
            order_id,
            filled_quantity: base_qty,
            avg_price: price,
        })
    }

    async fn close(
        &self,
        symbol: &str,
        side: PositionSide,
        base_qty: Option<f64>,
    ) -> Result<OrderAck> {
        let mark = self.price_of(symbol).await?;
        // Closing a long sells, closing a short buys back.
        let price = ioc_limit_price(mark, side == PositionSide::Short);
        let mut state = self.state.write().await;

        let position = match state.positions.get_mut(symbol) {
            Some(p) if p.side == side => p,
            _ => {
                return Err(GauntletError::OrderRejected(format!(
                    "no open {side} position on {symbol}"
                )));
            }
        };

        // Reduce-only: never close more than the open size
        let qty = base_qty
            .map(|q| q.min(position.quantity))
            .unwrap_or(position.quantity);
        if qty <= 0.0 {
            return Err(GauntletError::OrderRejected(format!(
                "non-positive close quantity for {symbol}"
            )));
        }

        let pnl = match side {
            PositionSide::Long => (price - position.entry_price) * qty,
            PositionSide::Short => (position.entry_price - price) * qty,
        };
        position.quantity -= qty;
        let fully_closed = position.quantity <= f64::EPSILON;
        if fully_closed {
            state.positions.remove(symbol);
        }
        state.cash += pnl;
        if fully_closed {
            state.brackets.retain(|b| b.symbol != symbol);
        }

        state.next_order_id += 1;
        let order_id = format!("paper-{}", state.next_order_id);
        debug!(symbol, ?side, qty, price, pnl, "paper close");
        Ok(OrderAck {
            order_id,
            filled_quantity: qty,
            avg_price: price,
        })
    }
}

#[async_trait]
impl ExchangeAdapter for PaperExchange {
    fn name(&self) -> &str {
        "paper"
    }

    async fn balance(&self) -> Result<AccountBalance> {
        let prices = self.prices.read().await;
        let state = self.state.read().await;

        let mut unrealized = 0.0;
        let mut margin_used = 0.0;
        for (symbol, p) in &state.positions {
            let mark = prices.get(symbol).copied().unwrap_or(p.entry_price);
            unrealized += match p.side {
                PositionSide::Long => (mark - p.entry_price) * p.quantity,
                PositionSide::Short => (p.entry_price - mark) * p.quantity,
            };
            margin_used += p.entry_price * p.quantity / p.leverage.max(1) as f64;
        }

        Ok(AccountBalance {
            total_equity: state.cash + unrealized,
            available_balance: state.cash - margin_used,
            unrealized_pnl: unrealized,
            margin_used,
        })
    }

    async fn positions(&self) -> Result<Vec<PositionInfo>> {
        let prices = self.prices.read().await;
        let state = self.state.read().await;

        let mut out = Vec::with_capacity(state.positions.len());
        for (symbol, p) in &state.positions {
            if p.quantity <= 0.0 {
                continue;
            }
            let mark = prices.get(symbol).copied().unwrap_or(p.entry_price);
            let pnl = match p.side {
                PositionSide::Long => (mark - p.entry_price) * p.quantity,
                PositionSide::Short => (p.entry_price - mark) * p.quantity,
            };
            let margin = p.entry_price * p.quantity / p.leverage.max(1) as f64;
            let liquidation = match p.side {
                PositionSide::Long => p.entry_price * (1.0 - 1.0 / p.leverage.max(1) as f64),
                PositionSide::Short => p.entry_price * (1.0 + 1.0 / p.leverage.max(1) as f64),
            };
            out.push(PositionInfo {
                symbol: symbol.clone(),
                side: p.side,
                entry_price: p.entry_price,
                mark_price: mark,
                quantity: p.quantity,
                leverage: p.leverage,
                unrealized_pnl: pnl,
                unrealized_pnl_pct: if margin > 0.0 { pnl / margin * 100.0 } else { 0.0 },
                liquidation_price: liquidation,
                margin_used: margin,
                update_time_ms: p.opened_at_ms,
            });
        }
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(out)
    }

    async fn market_price(&self, symbol: &str) -> Result<f64> {
        self.price_of(symbol).await
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        debug!(symbol, leverage, "paper leverage set");
        Ok(())
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<()> {
        self.state
            .write()
            .await
            .brackets
            .retain(|b| b.symbol != symbol);
        Ok(())
    }

    async fn open_long(&self, symbol: &str, base_qty: f64, leverage: u32) -> Result<OrderAck> {
        self.open(symbol, PositionSide::Long, base_qty, leverage).await
    }

    async fn open_short(&self, symbol: &str, base_qty: f64, leverage: u32) -> Result<OrderAck> {
        self.open(symbol, PositionSide::Short, base_qty, leverage).await
    }

    async fn close_long(&self, symbol: &str, base_qty: Option<f64>) -> Result<OrderAck> {
        self.close(symbol, PositionSide::Long, base_qty).await
    }

    async fn close_short(&self, symbol: &str, base_qty: Option<f64>) -> Result<OrderAck> {
        self.close(symbol, PositionSide::Short, base_qty).await
    }

    async fn set_stop_loss(
        &self,
        symbol: &str,
        side: PositionSide,
        quantity: f64,
        price: f64,
    ) -> Result<()> {
        self.state.write().await.brackets.push(BracketOrder {
            symbol: symbol.to_string(),
            side,
            quantity,
            trigger_price: price,
            is_stop_loss: true,
        });
        Ok(())
    }

    async fn set_take_profit(
        &self,
        symbol: &str,
        side: PositionSide,
        quantity: f64,
        price: f64,
    ) -> Result<()> {
        self.state.write().await.brackets.push(BracketOrder {
            symbol: symbol.to_string(),
            side,
            quantity,
            trigger_price: price,
            is_stop_loss: false,
        });
        Ok(())
    }

    async fn contract_spec(&self, symbol: &str) -> Result<ContractSpec> {
        Ok(self
            .specs
            .read()
            .await
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| ContractSpec::unit(symbol)))
    }

    async fn invalidate_caches(&self) {
        // Nothing cached here; the counter lets tests assert the protocol.
        self.invalidations
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}
