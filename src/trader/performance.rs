//! Rolling performance statistics over the decision log.
//!
//! Closed trades are reconstructed by pairing successful open and close
//! outcomes per symbol in FIFO order. Only the Sharpe ratio feeds back into
//! the prompt; the full report is served to API consumers.

use serde::{Deserialize, Serialize};

use crate::domain::{ActionOutcome, CycleRecord, DecisionAction, PositionSide};
use crate::logger::DecisionLogger;

/// Closed trades included in the rolling Sharpe window.
const SHARPE_WINDOW: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub total_trades: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,
    pub sharpe_ratio: f64,
}

impl Default for PerformanceReport {
    fn default() -> Self {
        Self {
            total_trades: 0,
            win_rate: 0.0,
            avg_win: 0.0,
            avg_loss: 0.0,
            profit_factor: 0.0,
            sharpe_ratio: 0.0,
        }
    }
}

/// One reconstructed round trip.
#[derive(Debug, Clone, Copy)]
struct ClosedTrade {
    pnl: f64,
    /// Fractional return on the entry notional.
    ret: f64,
}

#[derive(Debug, Clone, Copy)]
struct OpenLot {
    side: PositionSide,
    price: f64,
    quantity: f64,
}

pub struct PerformanceAnalyzer {
    window: usize,
}

impl PerformanceAnalyzer {
    pub fn new() -> Self {
        Self {
            window: SHARPE_WINDOW,
        }
    }

    pub async fn analyze(&self, logger: &DecisionLogger) -> PerformanceReport {
        let records = logger.all().await;
        self.analyze_records(&records)
    }

    pub fn analyze_records(&self, records: &[CycleRecord]) -> PerformanceReport {
        let trades = pair_trades(records);
        if trades.is_empty() {
            return PerformanceReport::default();
        }

        let wins: Vec<f64> = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).collect();
        let losses: Vec<f64> = trades.iter().filter(|t| t.pnl < 0.0).map(|t| t.pnl).collect();

        let gross_win: f64 = wins.iter().sum();
        let gross_loss: f64 = losses.iter().sum::<f64>().abs();

        let returns: Vec<f64> = trades
            .iter()
            .rev()
            .take(self.window)
            .map(|t| t.ret)
            .collect();

        PerformanceReport {
            total_trades: trades.len(),
            win_rate: wins.len() as f64 / trades.len() as f64,
            avg_win: if wins.is_empty() {
                0.0
            } else {
                gross_win / wins.len() as f64
            },
            avg_loss: if losses.is_empty() {
                0.0
            } else {
                -gross_loss / losses.len() as f64
            },
            profit_factor: if gross_loss > 0.0 {
                gross_win / gross_loss
            } else if gross_win > 0.0 {
                f64::INFINITY
            } else {
                0.0
            },
            sharpe_ratio: sharpe(&returns),
        }
    }
}

impl Default for PerformanceAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Mean over population stddev of the rolling returns; 0 without variance.
fn sharpe(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let stddev = variance.sqrt();
    if stddev == 0.0 {
        return 0.0;
    }
    mean / stddev
}

/// Pair successful open/close outcomes per symbol, FIFO.
fn pair_trades(records: &[CycleRecord]) -> Vec<ClosedTrade> {
    use std::collections::HashMap;

    let mut open_lots: HashMap<String, Vec<OpenLot>> = HashMap::new();
    let mut closed = Vec::new();

    let outcomes = records
        .iter()
        .flat_map(|r| r.per_action_outcomes.iter())
        .filter(|o| o.success);

    for outcome in outcomes {
        let (Some(price), Some(quantity)) = (outcome.price, outcome.quantity) else {
            continue;
        };
        match outcome.action {
            DecisionAction::OpenLong | DecisionAction::OpenShort => {
                let side = if outcome.action == DecisionAction::OpenLong {
                    PositionSide::Long
                } else {
                    PositionSide::Short
                };
                open_lots.entry(outcome.symbol.clone()).or_default().push(OpenLot {
                    side,
                    price,
                    quantity,
                });
            }
            DecisionAction::CloseLong | DecisionAction::CloseShort => {
                let side = if outcome.action == DecisionAction::CloseLong {
                    PositionSide::Long
                } else {
                    PositionSide::Short
                };
                close_against_lots(&mut open_lots, outcome, side, price, quantity, &mut closed);
            }
            _ => {}
        }
    }

    closed
}

fn close_against_lots(
    open_lots: &mut std::collections::HashMap<String, Vec<OpenLot>>,
    outcome: &ActionOutcome,
    side: PositionSide,
    close_price: f64,
    mut close_qty: f64,
    closed: &mut Vec<ClosedTrade>,
) {
    let Some(lots) = open_lots.get_mut(&outcome.symbol) else {
        return;
    };

    while close_qty > 0.0 {
        let Some(lot_index) = lots.iter().position(|l| l.side == side) else {
            break;
        };
        let lot = &mut lots[lot_index];
        let matched = close_qty.min(lot.quantity);

        let pnl = match side {
            PositionSide::Long => (close_price - lot.price) * matched,
            PositionSide::Short => (lot.price - close_price) * matched,
        };
        let notional = lot.price * matched;
        closed.push(ClosedTrade {
            pnl,
            ret: if notional > 0.0 { pnl / notional } else { 0.0 },
        });

        lot.quantity -= matched;
        close_qty -= matched;
        if lot.quantity <= f64::EPSILON {
            lots.remove(lot_index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ActionOutcome;

    fn outcome(action: DecisionAction, symbol: &str, price: f64, qty: f64) -> ActionOutcome {
        ActionOutcome::success(symbol, action, "fill").with_fill(None, price, qty)
    }

    fn record_with(outcomes: Vec<ActionOutcome>) -> CycleRecord {
        let mut r = CycleRecord::skipped("t1", 0, "x");
        r.per_action_outcomes = outcomes;
        r
    }

    #[test]
    fn empty_log_yields_default_report() {
        let report = PerformanceAnalyzer::new().analyze_records(&[]);
        assert_eq!(report.total_trades, 0);
        assert_eq!(report.sharpe_ratio, 0.0);
    }

    #[test]
    fn long_round_trip_counts_as_win() {
        let records = vec![
            record_with(vec![outcome(DecisionAction::OpenLong, "BTCUSDT", 100.0, 2.0)]),
            record_with(vec![outcome(DecisionAction::CloseLong, "BTCUSDT", 110.0, 2.0)]),
        ];
        let report = PerformanceAnalyzer::new().analyze_records(&records);
        assert_eq!(report.total_trades, 1);
        assert_eq!(report.win_rate, 1.0);
        assert!((report.avg_win - 20.0).abs() < 1e-9);
    }

    #[test]
    fn short_pnl_is_inverted() {
        let records = vec![
            record_with(vec![outcome(DecisionAction::OpenShort, "ETHUSDT", 100.0, 1.0)]),
            record_with(vec![outcome(DecisionAction::CloseShort, "ETHUSDT", 90.0, 1.0)]),
        ];
        let report = PerformanceAnalyzer::new().analyze_records(&records);
        assert_eq!(report.total_trades, 1);
        assert!((report.avg_win - 10.0).abs() < 1e-9);
    }

    #[test]
    fn fifo_pairing_matches_earliest_lot_first() {
        let records = vec![
            record_with(vec![
                outcome(DecisionAction::OpenLong, "BTCUSDT", 100.0, 1.0),
                outcome(DecisionAction::OpenLong, "BTCUSDT", 200.0, 1.0),
            ]),
            record_with(vec![outcome(DecisionAction::CloseLong, "BTCUSDT", 150.0, 1.0)]),
        ];
        let report = PerformanceAnalyzer::new().analyze_records(&records);
        // Matches the 100 lot -> +50, not the 200 lot
        assert_eq!(report.total_trades, 1);
        assert_eq!(report.win_rate, 1.0);
        assert!((report.avg_win - 50.0).abs() < 1e-9);
    }

    #[test]
    fn profit_factor_and_mixed_outcomes() {
        let records = vec![
            record_with(vec![outcome(DecisionAction::OpenLong, "A", 100.0, 1.0)]),
            record_with(vec![outcome(DecisionAction::CloseLong, "A", 130.0, 1.0)]),
            record_with(vec![outcome(DecisionAction::OpenLong, "B", 100.0, 1.0)]),
            record_with(vec![outcome(DecisionAction::CloseLong, "B", 90.0, 1.0)]),
        ];
        let report = PerformanceAnalyzer::new().analyze_records(&records);
        assert_eq!(report.total_trades, 2);
        assert!((report.win_rate - 0.5).abs() < 1e-9);
        assert!((report.profit_factor - 3.0).abs() < 1e-9);
        assert!((report.avg_loss + 10.0).abs() < 1e-9);
    }

    #[test]
    fn failed_outcomes_and_unmatched_closes_are_ignored() {
        let mut failed = outcome(DecisionAction::OpenLong, "A", 100.0, 1.0);
        failed.success = false;
        let records = vec![
            record_with(vec![failed]),
            record_with(vec![outcome(DecisionAction::CloseLong, "A", 120.0, 1.0)]),
            record_with(vec![outcome(DecisionAction::CloseShort, "Z", 50.0, 1.0)]),
        ];
        let report = PerformanceAnalyzer::new().analyze_records(&records);
        assert_eq!(report.total_trades, 0);
    }

    #[test]
    fn sharpe_sign_tracks_return_direction() {
        let mut records = Vec::new();
        for i in 0..6 {
            let exit = if i % 2 == 0 { 112.0 } else { 108.0 }; // always profitable
            records.push(record_with(vec![outcome(DecisionAction::OpenLong, "A", 100.0, 1.0)]));
            records.push(record_with(vec![outcome(DecisionAction::CloseLong, "A", exit, 1.0)]));
        }
        let report = PerformanceAnalyzer::new().analyze_records(&records);
        assert!(report.sharpe_ratio > 0.0);

        let mut records = Vec::new();
        for i in 0..6 {
            let exit = if i % 2 == 0 { 88.0 } else { 92.0 };
            records.push(record_with(vec![outcome(DecisionAction::OpenLong, "A", 100.0, 1.0)]));
            records.push(record_with(vec![outcome(DecisionAction::CloseLong, "A", exit, 1.0)]));
        }
        let report = PerformanceAnalyzer::new().analyze_records(&records);
        assert!(report.sharpe_ratio < 0.0);
    }
}
