//! Translates validated decisions into exchange adapter calls.
//!
//! Open protocol: cancel resting orders, set leverage, quantize the size,
//! optionally shrink by the safety buffer, precheck available balance and
//! the margin-usage cap, submit, invalidate caches, then attach the
//! reduce-only bracket. Bracket failures never reverse the entry; they are
//! recorded and escalated in the log.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::decision::TradingLimits;
use crate::domain::{ActionOutcome, Decision, DecisionAction, PositionSide};
use crate::error::{GauntletError, Result};
use crate::exchange::ExchangeAdapter;

/// Position-size policy applied at execution time.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionPolicy {
    /// Shrink every opening order by this percent to dodge margin rejects.
    pub safety_buffer_pct: f64,
    /// Abort an open (soft) when expected margin exceeds available balance.
    pub check_available_before_open: bool,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            safety_buffer_pct: 0.0,
            check_available_before_open: false,
        }
    }
}

pub struct OrderExecutor {
    adapter: Arc<dyn ExchangeAdapter>,
    policy: ExecutionPolicy,
    limits: TradingLimits,
}

impl OrderExecutor {
    pub fn new(
        adapter: Arc<dyn ExchangeAdapter>,
        policy: ExecutionPolicy,
        limits: TradingLimits,
    ) -> Self {
        Self {
            adapter,
            policy,
            limits,
        }
    }

    /// Execute one decision, always producing an outcome. Adapter failures
    /// become failed outcomes; they never abort the batch.
    pub async fn execute(&self, decision: &Decision) -> ActionOutcome {
        let result = match decision.action {
            DecisionAction::OpenLong => self.open(decision, PositionSide::Long).await,
            DecisionAction::OpenShort => self.open(decision, PositionSide::Short).await,
            DecisionAction::CloseLong => self.close(decision, PositionSide::Long).await,
            DecisionAction::CloseShort => self.close(decision, PositionSide::Short).await,
            DecisionAction::Hold | DecisionAction::Wait => {
                return ActionOutcome::success(
                    decision.symbol.clone(),
                    decision.action,
                    "no action",
                );
            }
            DecisionAction::Unknown => {
                return ActionOutcome::failure(
                    decision.symbol.clone(),
                    decision.action,
                    "unrecognized action",
                );
            }
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(symbol = %decision.symbol, action = %decision.action, error = %e, "execution failed");
                ActionOutcome::failure(decision.symbol.clone(), decision.action, e.to_string())
            }
        }
    }

    async fn open(&self, decision: &Decision, side: PositionSide) -> Result<ActionOutcome> {
        let symbol = &decision.symbol;

        // Resting orders first; their absence is not an error.
        if let Err(e) = self.adapter.cancel_all_orders(symbol).await {
            warn!(symbol, error = %e, "cancel-all before open failed");
        }

        self.adapter.set_leverage(symbol, decision.leverage).await?;

        let price = self.adapter.market_price(symbol).await?;
        if price <= 0.0 {
            return Err(GauntletError::Exchange(format!(
                "no usable market price for {symbol}"
            )));
        }

        let spec = self.adapter.contract_spec(symbol).await?;
        let mut base_qty = decision.position_size_usd / price;
        if self.policy.safety_buffer_pct > 0.0 {
            base_qty *= 1.0 - self.policy.safety_buffer_pct / 100.0;
        }
        let base_qty = spec.quantize_quantity(base_qty);

        if self.policy.check_available_before_open || self.limits.max_margin_usage_pct > 0.0 {
            let balance = self.adapter.balance().await?;
            let expected_margin = price * base_qty / decision.leverage.max(1) as f64;

            if self.policy.check_available_before_open
                && expected_margin > balance.available_balance
            {
                return Ok(ActionOutcome::failure(
                    symbol.clone(),
                    decision.action,
                    format!(
                        "skipped: expected margin {expected_margin:.2} exceeds available {:.2}",
                        balance.available_balance
                    ),
                ));
            }

            // Margin cap: the open must not push total usage over the limit
            if self.limits.max_margin_usage_pct > 0.0 && balance.total_equity > 0.0 {
                let projected_pct =
                    (balance.margin_used + expected_margin) / balance.total_equity * 100.0;
                if projected_pct > self.limits.max_margin_usage_pct {
                    return Ok(ActionOutcome::failure(
                        symbol.clone(),
                        decision.action,
                        format!(
                            "skipped: projected margin usage {projected_pct:.1}% exceeds the {:.1}% cap",
                            self.limits.max_margin_usage_pct
                        ),
                    ));
                }
            }
        }

        let ack = match side {
            PositionSide::Long => self.adapter.open_long(symbol, base_qty, decision.leverage).await?,
            PositionSide::Short => {
                self.adapter.open_short(symbol, base_qty, decision.leverage).await?
            }
        };
        self.adapter.invalidate_caches().await;

        info!(
            symbol,
            side = %side,
            qty = ack.filled_quantity,
            price = ack.avg_price,
            "position opened"
        );

        // Brackets are best-effort and sized to the full position.
        let mut detail = format!(
            "opened {side} {} @ {:.4}",
            spec.format_quantity(ack.filled_quantity),
            ack.avg_price
        );
        if let Err(e) = self
            .adapter
            .set_stop_loss(symbol, side, ack.filled_quantity, decision.stop_loss)
            .await
        {
            error!(symbol, error = %e, "stop-loss placement failed; position is unprotected");
            detail.push_str(&format!(" | stop-loss placement FAILED: {e}"));
        }
        if let Err(e) = self
            .adapter
            .set_take_profit(symbol, side, ack.filled_quantity, decision.take_profit)
            .await
        {
            error!(symbol, error = %e, "take-profit placement failed");
            detail.push_str(&format!(" | take-profit placement FAILED: {e}"));
        }

        Ok(
            ActionOutcome::success(symbol.clone(), decision.action, detail).with_fill(
                Some(ack.order_id),
                ack.avg_price,
                ack.filled_quantity,
            ),
        )
    }

    async fn close(&self, decision: &Decision, side: PositionSide) -> Result<ActionOutcome> {
        let symbol = &decision.symbol;

        // The exchange is the source of truth for what is actually open.
        let positions = self.adapter.positions().await?;
        let Some(position) = positions
            .iter()
            .find(|p| p.symbol == *symbol && p.side == side)
        else {
            // Soft error: log and let the batch continue.
            return Ok(ActionOutcome::failure(
                symbol.clone(),
                decision.action,
                format!("no open {side} position to close"),
            ));
        };

        let ack = match side {
            PositionSide::Long => self.adapter.close_long(symbol, Some(position.quantity)).await?,
            PositionSide::Short => {
                self.adapter.close_short(symbol, Some(position.quantity)).await?
            }
        };
        self.adapter.invalidate_caches().await;

        info!(
            symbol,
            side = %side,
            qty = ack.filled_quantity,
            price = ack.avg_price,
            "position closed"
        );

        Ok(ActionOutcome::success(
            symbol.clone(),
            decision.action,
            format!("closed {side} {:.6} @ {:.4}", ack.filled_quantity, ack.avg_price),
        )
        .with_fill(Some(ack.order_id), ack.avg_price, ack.filled_quantity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::PaperExchange;

    fn open_long_decision(symbol: &str, size_usd: f64) -> Decision {
        Decision {
            symbol: symbol.into(),
            action: DecisionAction::OpenLong,
            leverage: 5,
            position_size_usd: size_usd,
            stop_loss: 90.0,
            take_profit: 140.0,
            confidence: 80,
            risk_usd: None,
            reasoning: "test".into(),
        }
    }

    async fn exchange_at(price: f64, balance: f64) -> Arc<PaperExchange> {
        let exchange = Arc::new(PaperExchange::new(balance));
        exchange.set_price("BTCUSDT", price).await;
        exchange
    }

    fn default_executor(exchange: Arc<PaperExchange>) -> OrderExecutor {
        OrderExecutor::new(exchange, ExecutionPolicy::default(), TradingLimits::default())
    }

    #[tokio::test]
    async fn open_attaches_both_brackets_and_invalidate_fires() {
        let exchange = exchange_at(100.0, 10_000.0).await;
        let executor = default_executor(exchange.clone());

        let outcome = executor.execute(&open_long_decision("BTCUSDT", 500.0)).await;
        assert!(outcome.success, "{}", outcome.detail);
        assert_eq!(outcome.quantity, Some(5.0));

        let brackets = exchange.bracket_orders().await;
        assert_eq!(brackets.len(), 2);
        assert!(brackets.iter().any(|b| b.is_stop_loss && b.trigger_price == 90.0));
        assert!(brackets.iter().any(|b| !b.is_stop_loss && b.trigger_price == 140.0));
        assert!(exchange.invalidation_count() >= 1);
    }

    #[tokio::test]
    async fn safety_buffer_shrinks_the_order() {
        let exchange = exchange_at(100.0, 10_000.0).await;
        let policy = ExecutionPolicy {
            safety_buffer_pct: 10.0,
            check_available_before_open: false,
        };
        let executor = OrderExecutor::new(exchange.clone(), policy, TradingLimits::default());

        let outcome = executor.execute(&open_long_decision("BTCUSDT", 1000.0)).await;
        assert!(outcome.success);
        // 10 units shrunk by 10% -> 9
        assert_eq!(outcome.quantity, Some(9.0));
    }

    #[tokio::test]
    async fn available_balance_precheck_soft_aborts() {
        let exchange = exchange_at(100.0, 50.0).await;
        let policy = ExecutionPolicy {
            safety_buffer_pct: 0.0,
            check_available_before_open: true,
        };
        let executor = OrderExecutor::new(exchange.clone(), policy, TradingLimits::default());

        // 500 USD at 5x needs 100 margin; only 50 available
        let outcome = executor.execute(&open_long_decision("BTCUSDT", 500.0)).await;
        assert!(!outcome.success);
        assert!(outcome.detail.contains("exceeds available"), "{}", outcome.detail);
        assert!(exchange.positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn margin_usage_cap_soft_aborts_the_open() {
        let exchange = exchange_at(100.0, 1000.0).await;
        let limits = TradingLimits {
            max_margin_usage_pct: 5.0,
            ..Default::default()
        };
        let executor = OrderExecutor::new(exchange.clone(), ExecutionPolicy::default(), limits);

        // 500 USD at 5x projects 100 margin on 1000 equity: 10% > the 5% cap
        let outcome = executor.execute(&open_long_decision("BTCUSDT", 500.0)).await;
        assert!(!outcome.success);
        assert!(outcome.detail.contains("margin usage"), "{}", outcome.detail);
        assert!(exchange.positions().await.unwrap().is_empty());

        // A small order stays under the cap and goes through
        let outcome = executor.execute(&open_long_decision("BTCUSDT", 100.0)).await;
        assert!(outcome.success, "{}", outcome.detail);
    }

    #[tokio::test]
    async fn close_without_position_is_soft_error() {
        let exchange = exchange_at(100.0, 10_000.0).await;
        let executor = default_executor(exchange.clone());

        let close = Decision {
            action: DecisionAction::CloseLong,
            ..Decision::wait("BTCUSDT", "tp")
        };
        let outcome = executor.execute(&close).await;
        assert!(!outcome.success);
        assert!(outcome.detail.contains("no open long position"));
    }

    #[tokio::test]
    async fn open_then_close_round_trips_position_count() {
        let exchange = exchange_at(100.0, 10_000.0).await;
        let executor = default_executor(exchange.clone());

        let before = exchange.positions().await.unwrap().len();
        executor.execute(&open_long_decision("BTCUSDT", 500.0)).await;
        assert_eq!(exchange.positions().await.unwrap().len(), before + 1);

        let close = Decision {
            action: DecisionAction::CloseLong,
            ..Decision::wait("BTCUSDT", "done")
        };
        let outcome = executor.execute(&close).await;
        assert!(outcome.success);
        assert_eq!(exchange.positions().await.unwrap().len(), before);
    }

    #[tokio::test]
    async fn hold_and_wait_are_no_ops() {
        let exchange = exchange_at(100.0, 10_000.0).await;
        let executor = default_executor(exchange.clone());

        let outcome = executor.execute(&Decision::wait("BTCUSDT", "chop")).await;
        assert!(outcome.success);
        assert_eq!(outcome.detail, "no action");
        assert!(exchange.positions().await.unwrap().is_empty());
    }
}
