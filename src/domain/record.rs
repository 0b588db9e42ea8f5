use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AccountInfo, Decision, DecisionAction};

/// Result of executing one decision against the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub symbol: String,
    pub action: DecisionAction,
    pub success: bool,
    /// Human-readable detail: fill summary on success, error text on failure.
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    pub executed_at: DateTime<Utc>,
}

impl ActionOutcome {
    pub fn success(
        symbol: impl Into<String>,
        action: DecisionAction,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            action,
            success: true,
            detail: detail.into(),
            order_id: None,
            price: None,
            quantity: None,
            executed_at: Utc::now(),
        }
    }

    pub fn failure(
        symbol: impl Into<String>,
        action: DecisionAction,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            action,
            success: false,
            detail: detail.into(),
            order_id: None,
            price: None,
            quantity: None,
            executed_at: Utc::now(),
        }
    }

    pub fn with_fill(mut self, order_id: Option<String>, price: f64, quantity: f64) -> Self {
        self.order_id = order_id;
        self.price = Some(price);
        self.quantity = Some(quantity);
        self
    }
}

/// Persisted, append-only record of one complete agent cycle.
///
/// Records embed the full transcript so they are self-describing; they are
/// pruned by retention age and never edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRecord {
    pub cycle_number: u64,
    pub trader_id: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(default)]
    pub input_prompt: String,
    #[serde(default)]
    pub cot_trace: String,
    #[serde(default)]
    pub decisions: Vec<Decision>,
    #[serde(default)]
    pub per_action_outcomes: Vec<ActionOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_state: Option<AccountInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl CycleRecord {
    /// Minimal record for cycles that never reached the LLM (halt, no data).
    pub fn skipped(
        trader_id: impl Into<String>,
        cycle_number: u64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            cycle_number,
            trader_id: trader_id.into(),
            timestamp: Utc::now(),
            success: true,
            input_prompt: String::new(),
            cot_trace: String::new(),
            decisions: vec![Decision::wait("", reason)],
            per_action_outcomes: Vec::new(),
            account_state: None,
            error_message: None,
        }
    }

    /// Record for a cycle that failed before producing decisions.
    pub fn failed(trader_id: impl Into<String>, cycle_number: u64, error: impl Into<String>) -> Self {
        Self {
            cycle_number,
            trader_id: trader_id.into(),
            timestamp: Utc::now(),
            success: false,
            input_prompt: String::new(),
            cot_trace: String::new(),
            decisions: Vec::new(),
            per_action_outcomes: Vec::new(),
            account_state: None,
            error_message: Some(error.into()),
        }
    }
}
