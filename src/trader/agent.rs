//! The agent cycle engine: one independent AI trading loop.
//!
//! Each tick runs the sequential pipeline: daily reset, halt window, risk
//! gate, candidate assembly, snapshot fetch with the liquidity filter,
//! prompt build, LLM call, parse/validate, execution, and the cycle record.
//! At most one cycle per agent runs at any instant; a tick that fires while
//! a cycle is in flight is dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::account::AccountProjector;
use crate::decision::{self, DecisionContext, PromptRegistry, TradingLimits};
use crate::domain::{
    AccountInfo, ActionOutcome, CandidateCoin, CycleRecord, MarketSnapshot, PositionInfo,
};
use crate::error::Result;
use crate::exchange::ExchangeAdapter;
use crate::llm::ChatCompleter;
use crate::logger::DecisionLogger;
use crate::market::SnapshotAssembler;
use crate::pool::CandidatePool;

use super::executor::{ExecutionPolicy, OrderExecutor};
use super::performance::{PerformanceAnalyzer, PerformanceReport};

/// Non-position candidates below this OI notional (USD) are dropped.
const MIN_OI_VALUE_USD: f64 = 15_000_000.0;

/// Risk stops that put the agent into a halt window.
#[derive(Debug, Clone, Copy)]
pub struct RiskLimits {
    /// Halt when the day's loss exceeds this percent of the day-start equity.
    pub max_daily_loss_pct: f64,
    /// Halt when drawdown from peak equity exceeds this percent.
    pub max_drawdown_pct: f64,
    pub stop_trading_duration: Duration,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_daily_loss_pct: 10.0,
            max_drawdown_pct: 20.0,
            stop_trading_duration: Duration::from_secs(60 * 60),
        }
    }
}

/// Immutable per-agent identity and policy.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub id: String,
    pub name: String,
    /// Display label of the model behind this agent.
    pub model_label: String,
    pub scan_interval: Duration,
    pub initial_balance: f64,
    pub limits: TradingLimits,
    pub execution: ExecutionPolicy,
    pub risk: RiskLimits,
    pub prompt_template: Option<String>,
}

/// Mutable runtime state, guarded by the agent's state lock.
#[derive(Debug)]
struct RuntimeState {
    cycle_count: u64,
    start_time: DateTime<Utc>,
    /// Equity high-watermark; never decreases within a run.
    peak_equity: f64,
    daily_start_equity: f64,
    daily_reset_date: NaiveDate,
    trading_halted_until: Option<DateTime<Utc>>,
    running: bool,
}

/// Point-in-time status for API consumers.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AgentStatus {
    pub cycle_count: u64,
    pub running: bool,
    pub halted_until: Option<DateTime<Utc>>,
    pub start_time: DateTime<Utc>,
}

pub struct Agent {
    config: AgentConfig,
    llm: Arc<dyn ChatCompleter>,
    assembler: SnapshotAssembler,
    pool: Arc<CandidatePool>,
    prompts: Arc<PromptRegistry>,
    projector: AccountProjector,
    executor: OrderExecutor,
    analyzer: PerformanceAnalyzer,
    logger: Arc<DecisionLogger>,
    state: Mutex<RuntimeState>,
    /// Serializes cycles; a failed `try_lock` drops the tick.
    cycle_lock: Mutex<()>,
    shutdown: watch::Sender<bool>,
}

impl Agent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AgentConfig,
        adapter: Arc<dyn ExchangeAdapter>,
        llm: Arc<dyn ChatCompleter>,
        assembler: SnapshotAssembler,
        pool: Arc<CandidatePool>,
        prompts: Arc<PromptRegistry>,
        logger: Arc<DecisionLogger>,
    ) -> Self {
        let projector = AccountProjector::new(adapter.clone(), config.initial_balance);
        let executor = OrderExecutor::new(adapter, config.execution, config.limits);
        let (shutdown, _) = watch::channel(false);

        Self {
            state: Mutex::new(RuntimeState {
                cycle_count: 0,
                start_time: Utc::now(),
                peak_equity: config.initial_balance,
                daily_start_equity: config.initial_balance,
                daily_reset_date: Utc::now().date_naive(),
                trading_halted_until: None,
                running: false,
            }),
            config,
            llm,
            assembler,
            pool,
            prompts,
            projector,
            executor,
            analyzer: PerformanceAnalyzer::new(),
            logger,
            cycle_lock: Mutex::new(()),
            shutdown,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn model_label(&self) -> &str {
        &self.config.model_label
    }

    pub fn logger(&self) -> &Arc<DecisionLogger> {
        &self.logger
    }

    pub async fn status(&self) -> AgentStatus {
        let state = self.state.lock().await;
        AgentStatus {
            cycle_count: state.cycle_count,
            running: state.running,
            halted_until: state.trading_halted_until,
            start_time: state.start_time,
        }
    }

    pub async fn account(&self) -> Result<AccountInfo> {
        self.projector.account().await
    }

    pub async fn positions(&self) -> Result<Vec<PositionInfo>> {
        self.projector.positions().await
    }

    pub async fn performance(&self) -> PerformanceReport {
        self.analyzer.analyze(&self.logger).await
    }

    /// Signal the driver loop to stop after any in-flight cycle.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Timer-driven loop. Exits when `stop()` is called; the in-flight cycle
    /// finishes first because ticks and shutdown share one task.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            state.running = true;
            state.start_time = Utc::now();
        }
        info!(id = %self.config.id, name = %self.config.name, "agent started");

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(self.config.scan_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        self.state.lock().await.running = false;
        info!(id = %self.config.id, "agent stopped");
        Ok(())
    }

    /// One timer tick. Coalescing: if a cycle is already in flight the tick
    /// is dropped rather than queued.
    pub async fn tick(&self) {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            debug!(id = %self.config.id, "cycle in progress, tick dropped");
            return;
        };

        if let Err(e) = self.run_cycle().await {
            error!(id = %self.config.id, error = %e, "cycle failed");
        }
    }

    /// The full cycle pipeline. Errors here are recorded, not propagated:
    /// the agent keeps running.
    async fn run_cycle(&self) -> Result<()> {
        let cycle_number = {
            let state = self.state.lock().await;
            state.cycle_count + 1
        };
        let now = Utc::now();

        // 1. Daily reset, 2. halt window, 3. risk gate
        let account = match self.projector.account().await {
            Ok(a) => a,
            Err(e) => {
                warn!(id = %self.config.id, error = %e, "account read failed");
                self.finish_cycle(CycleRecord::failed(
                    self.config.id.clone(),
                    cycle_number,
                    format!("account read failed: {e}"),
                ))
                .await?;
                return Ok(());
            }
        };

        if let Some(reason) = self.apply_risk_gates(&account, now).await {
            let mut record =
                CycleRecord::skipped(self.config.id.clone(), cycle_number, reason);
            record.account_state = Some(account);
            self.finish_cycle(record).await?;
            return Ok(());
        }

        // 4. Candidate assembly, 5. snapshots + liquidity filter
        let positions = self.projector.positions().await.unwrap_or_default();
        let candidates = self.pool.candidates().await;
        let symbols = merge_symbols(&candidates, &positions);
        let snapshots = self.fetch_snapshots(&symbols, &positions).await;

        if snapshots.is_empty() {
            let mut record = CycleRecord::skipped(
                self.config.id.clone(),
                cycle_number,
                "no market data for any candidate",
            );
            record.account_state = Some(account);
            self.finish_cycle(record).await?;
            return Ok(());
        }

        // 6-8. Prompt build, LLM call, parse + validate
        let performance = self.analyzer.analyze(&self.logger).await;
        let sharpe_ratio = (performance.total_trades > 0).then_some(performance.sharpe_ratio);
        let runtime_minutes = {
            let state = self.state.lock().await;
            (now - state.start_time).num_minutes()
        };

        let ctx = DecisionContext {
            current_time: now.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            cycle_number,
            runtime_minutes,
            account: account.clone(),
            positions: positions.clone(),
            candidates,
            snapshots,
            sharpe_ratio,
            limits: self.config.limits,
            template: self.config.prompt_template.clone(),
        };

        let full = match decision::decide(&ctx, self.llm.as_ref(), &self.prompts).await {
            Ok(full) => full,
            Err(e) => {
                // Transport failure after retries: the cycle is recorded as
                // failed and the agent keeps running.
                warn!(id = %self.config.id, error = %e, "decision round failed");
                let mut record =
                    CycleRecord::failed(self.config.id.clone(), cycle_number, e.to_string());
                record.account_state = Some(account);
                self.finish_cycle(record).await?;
                return Ok(());
            }
        };

        // 9. Execute decisions in the order the model returned them
        let mut outcomes: Vec<ActionOutcome> = Vec::with_capacity(full.decisions.len());
        for decision in &full.decisions {
            let outcome = self.executor.execute(decision).await;
            if !outcome.success {
                warn!(
                    id = %self.config.id,
                    symbol = %outcome.symbol,
                    action = %outcome.action,
                    detail = %outcome.detail,
                    "action failed"
                );
            }
            outcomes.push(outcome);
        }

        // 10. Record the full transcript with the post-cycle account view
        let post_account = self.projector.account().await.ok();
        let record = CycleRecord {
            cycle_number,
            trader_id: self.config.id.clone(),
            timestamp: now,
            success: true,
            input_prompt: full.user_prompt,
            cot_trace: full.cot_trace,
            decisions: full.decisions,
            per_action_outcomes: outcomes,
            account_state: post_account,
            error_message: None,
        };
        self.finish_cycle(record).await?;
        Ok(())
    }

    /// Steps 1-3: daily reset, halt window and the loss/drawdown gates.
    /// Returns the halt reason when the cycle must not trade.
    async fn apply_risk_gates(&self, account: &AccountInfo, now: DateTime<Utc>) -> Option<String> {
        let mut state = self.state.lock().await;

        let today = now.date_naive();
        if today != state.daily_reset_date {
            state.daily_start_equity = account.total_equity;
            state.daily_reset_date = today;
            debug!(id = %self.config.id, equity = account.total_equity, "daily equity reset");
        }

        if let Some(until) = state.trading_halted_until {
            if now < until {
                return Some(format!("halted until {}", until.format("%H:%M:%S UTC")));
            }
            state.trading_halted_until = None;
        }

        let daily_loss_pct = if state.daily_start_equity > 0.0 {
            (state.daily_start_equity - account.total_equity) / state.daily_start_equity * 100.0
        } else {
            0.0
        };
        let drawdown_pct = if state.peak_equity > 0.0 {
            (state.peak_equity - account.total_equity) / state.peak_equity * 100.0
        } else {
            0.0
        };

        let halt_reason = if daily_loss_pct > self.config.risk.max_daily_loss_pct {
            Some(format!(
                "daily loss {daily_loss_pct:.1}% exceeds the {:.1}% cap",
                self.config.risk.max_daily_loss_pct
            ))
        } else if drawdown_pct > self.config.risk.max_drawdown_pct {
            Some(format!(
                "drawdown {drawdown_pct:.1}% exceeds the {:.1}% cap",
                self.config.risk.max_drawdown_pct
            ))
        } else {
            None
        };

        if let Some(ref reason) = halt_reason {
            let until = now + chrono::Duration::from_std(self.config.risk.stop_trading_duration)
                .unwrap_or_else(|_| chrono::Duration::hours(1));
            state.trading_halted_until = Some(until);
            warn!(id = %self.config.id, %reason, until = %until, "risk gate tripped");
        }

        // Peak is a high-watermark: update after the gate so the triggering
        // equity does not erase the drawdown it measures.
        if account.total_equity > state.peak_equity {
            state.peak_equity = account.total_equity;
        }

        halt_reason
    }

    /// Step 5: fetch snapshots for the merged symbol set, applying the
    /// liquidity filter to non-position symbols. Symbol failures are soft.
    async fn fetch_snapshots(
        &self,
        symbols: &[String],
        positions: &[PositionInfo],
    ) -> HashMap<String, MarketSnapshot> {
        let mut snapshots = HashMap::new();

        for symbol in symbols {
            let snapshot = match self.assembler.snapshot(symbol).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(id = %self.config.id, symbol = %symbol, error = %e, "snapshot failed, symbol dropped");
                    continue;
                }
            };

            let held = positions.iter().any(|p| p.symbol == *symbol);
            if !held {
                if let Some(value) = snapshot.oi_value_usd() {
                    if value < MIN_OI_VALUE_USD {
                        debug!(
                            symbol = %symbol,
                            oi_value_musd = value / 1_000_000.0,
                            "below liquidity floor, symbol dropped"
                        );
                        continue;
                    }
                }
            }

            snapshots.insert(symbol.clone(), snapshot);
        }

        snapshots
    }

    /// Step 10-11: persist the record and advance the cycle counter.
    async fn finish_cycle(&self, record: CycleRecord) -> Result<()> {
        self.logger.record(record).await?;
        self.state.lock().await.cycle_count += 1;
        Ok(())
    }
}

/// Step 4: position symbols are required; candidate-pool symbols follow,
/// deduplicated (the pool itself already unions provenance tags).
fn merge_symbols(candidates: &[CandidateCoin], positions: &[PositionInfo]) -> Vec<String> {
    let mut symbols: Vec<String> = positions.iter().map(|p| p.symbol.clone()).collect();
    for coin in candidates {
        if !symbols.contains(&coin.symbol) {
            symbols.push(coin.symbol.clone());
        }
    }
    symbols
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CandidateSource, PositionSide};

    fn position(symbol: &str) -> PositionInfo {
        PositionInfo {
            symbol: symbol.into(),
            side: PositionSide::Long,
            entry_price: 1.0,
            mark_price: 1.0,
            quantity: 1.0,
            leverage: 1,
            unrealized_pnl: 0.0,
            unrealized_pnl_pct: 0.0,
            liquidation_price: 0.0,
            margin_used: 1.0,
            update_time_ms: 0,
        }
    }

    #[test]
    fn merge_puts_positions_first_and_dedupes() {
        let candidates = vec![
            CandidateCoin::new("BTCUSDT", CandidateSource::Ai500),
            CandidateCoin::new("SOLUSDT", CandidateSource::OiTop),
        ];
        let positions = vec![position("SOLUSDT"), position("ETHUSDT")];

        let merged = merge_symbols(&candidates, &positions);
        assert_eq!(merged, vec!["SOLUSDT", "ETHUSDT", "BTCUSDT"]);
    }
}
