//! The supervisor: agent registry, lifecycle and periodic log compaction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{GauntletError, Result};
use crate::trader::Agent;

/// Grace period for in-flight cycles on shutdown.
const STOP_GRACE: Duration = Duration::from_secs(30);

/// One row of the cross-agent comparison view.
#[derive(Debug, Clone, Serialize)]
pub struct TraderSummary {
    pub trader_id: String,
    pub trader_name: String,
    pub ai_model: String,
    pub total_equity: f64,
    pub total_pnl: f64,
    pub total_pnl_pct: f64,
    pub position_count: usize,
    pub margin_used_pct: f64,
    pub call_count: u64,
    pub is_running: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonView {
    pub traders: Vec<TraderSummary>,
    pub count: usize,
}

/// Stop handle for the periodic log-cleanup task.
pub struct CleanupHandle {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl CleanupHandle {
    /// Signal the task; it exits at the next tick.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}

/// Owns the set of agents keyed by id.
///
/// Readers (API handlers) share the registry lock only briefly and never
/// block running cycles.
pub struct TraderManager {
    agents: RwLock<HashMap<String, Arc<Agent>>>,
    driver_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TraderManager {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            driver_handles: Mutex::new(Vec::new()),
        }
    }

    /// Register a constructed agent; duplicate ids are rejected.
    pub async fn add_agent(&self, agent: Arc<Agent>) -> Result<String> {
        let id = agent.id().to_string();
        let mut agents = self.agents.write().await;
        if agents.contains_key(&id) {
            return Err(GauntletError::InvalidConfig(format!(
                "trader id '{id}' already exists"
            )));
        }
        info!(id = %id, name = %agent.name(), "trader registered");
        agents.insert(id.clone(), agent);
        Ok(id)
    }

    pub async fn get_agent(&self, id: &str) -> Result<Arc<Agent>> {
        self.agents
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| GauntletError::AgentNotFound(id.to_string()))
    }

    pub async fn get_all_agents(&self) -> Vec<Arc<Agent>> {
        let mut agents: Vec<Arc<Agent>> = self.agents.read().await.values().cloned().collect();
        agents.sort_by(|a, b| a.id().cmp(b.id()));
        agents
    }

    pub async fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.agents.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Spawn one independent driver task per agent. A panic or error in one
    /// driver is contained to its task.
    pub async fn start_all(&self) {
        let agents = self.get_all_agents().await;
        info!(count = agents.len(), "starting all traders");

        let mut handles = self.driver_handles.lock().await;
        for agent in agents {
            let id = agent.id().to_string();
            handles.push(tokio::spawn(async move {
                if let Err(e) = agent.run().await {
                    error!(id = %id, error = %e, "trader driver exited with error");
                }
            }));
        }
    }

    /// Signal every agent to stop, then wait out in-flight cycles up to the
    /// grace period.
    pub async fn stop_all(&self) {
        info!("stopping all traders");
        for agent in self.get_all_agents().await {
            agent.stop();
        }

        let mut handles = self.driver_handles.lock().await;
        for mut handle in handles.drain(..) {
            match tokio::time::timeout(STOP_GRACE, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "trader driver task panicked"),
                Err(_) => {
                    warn!("trader driver exceeded the grace period, aborting");
                    handle.abort();
                }
            }
        }
    }

    /// Run `clean_old_records` across all agents now, and then on every
    /// `interval` tick until the returned handle is stopped.
    pub fn start_decision_log_cleanup(
        self: Arc<Self>,
        retention_days: i64,
        interval: Duration,
    ) -> CleanupHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let manager = self;

        let handle = tokio::spawn(async move {
            manager.run_cleanup(retention_days).await;

            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // the immediate first tick was handled above
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        manager.run_cleanup(retention_days).await;
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            info!("decision log cleanup task stopped");
                            return;
                        }
                    }
                }
            }
        });

        info!(
            retention_days,
            interval_secs = interval.as_secs(),
            "decision log cleanup scheduled"
        );
        CleanupHandle {
            stop: stop_tx,
            handle,
        }
    }

    async fn run_cleanup(&self, retention_days: i64) {
        for agent in self.get_all_agents().await {
            match agent.logger().clean_old_records(retention_days).await {
                Ok(0) => {}
                Ok(removed) => info!(id = %agent.id(), removed, "old decision records pruned"),
                Err(e) => warn!(id = %agent.id(), error = %e, "decision log cleanup failed"),
            }
        }
    }

    /// Aggregate live state across all agents for the competition view.
    pub async fn comparison_view(&self) -> ComparisonView {
        let agents = self.get_all_agents().await;
        let mut traders = Vec::with_capacity(agents.len());

        for agent in agents {
            let Ok(account) = agent.account().await else {
                warn!(id = %agent.id(), "account read failed, trader omitted from comparison");
                continue;
            };
            let status = agent.status().await;

            traders.push(TraderSummary {
                trader_id: agent.id().to_string(),
                trader_name: agent.name().to_string(),
                ai_model: agent.model_label().to_string(),
                total_equity: account.total_equity,
                total_pnl: account.total_pnl,
                total_pnl_pct: account.total_pnl_pct,
                position_count: account.position_count,
                margin_used_pct: account.margin_used_pct,
                call_count: status.cycle_count,
                is_running: status.running,
            });
        }

        ComparisonView {
            count: traders.len(),
            traders,
        }
    }
}

impl Default for TraderManager {
    fn default() -> Self {
        Self::new()
    }
}
