use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provenance of a candidate symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    Ai500,
    OiTop,
}

/// A symbol the agent is permitted to consider, tagged with where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateCoin {
    pub symbol: String,
    pub sources: Vec<CandidateSource>,
}

impl CandidateCoin {
    pub fn new(symbol: impl Into<String>, source: CandidateSource) -> Self {
        Self {
            symbol: symbol.into(),
            sources: vec![source],
        }
    }

    /// Merge another sighting of the same symbol, unioning provenance tags.
    pub fn merge_source(&mut self, source: CandidateSource) {
        if !self.sources.contains(&source) {
            self.sources.push(source);
            self.sources.sort();
        }
    }

    pub fn is_double_signal(&self) -> bool {
        self.sources.contains(&CandidateSource::Ai500) && self.sources.contains(&CandidateSource::OiTop)
    }
}

/// Action requested by the model for one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    OpenLong,
    OpenShort,
    CloseLong,
    CloseShort,
    Hold,
    Wait,
    /// Any unrecognized action string; rejected at validation, not at parse.
    Unknown,
}

// Unknown action strings must not fail the whole decision array, so
// deserialization is total: anything unrecognized maps to `Unknown`.
impl<'de> Deserialize<'de> for DecisionAction {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "open_long" => Self::OpenLong,
            "open_short" => Self::OpenShort,
            "close_long" => Self::CloseLong,
            "close_short" => Self::CloseShort,
            "hold" => Self::Hold,
            "wait" => Self::Wait,
            _ => Self::Unknown,
        })
    }
}

impl DecisionAction {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::OpenLong | Self::OpenShort)
    }

    pub fn is_close(&self) -> bool {
        matches!(self, Self::CloseLong | Self::CloseShort)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenLong => "open_long",
            Self::OpenShort => "open_short",
            Self::CloseLong => "close_long",
            Self::CloseShort => "close_short",
            Self::Hold => "hold",
            Self::Wait => "wait",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One trade decision extracted from the model response.
///
/// Opening actions must carry leverage, size, stop loss, take profit and
/// confidence; close/hold/wait need only symbol, action and reasoning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(default)]
    pub symbol: String,
    /// Missing or unrecognized actions deserialize to `Unknown` so one bad
    /// object cannot sink the rest of the batch; validation rejects it.
    #[serde(default = "unknown_action")]
    pub action: DecisionAction,
    #[serde(default)]
    pub leverage: u32,
    #[serde(default)]
    pub position_size_usd: f64,
    #[serde(default)]
    pub stop_loss: f64,
    #[serde(default)]
    pub take_profit: f64,
    /// Model confidence, 0-100.
    #[serde(default)]
    pub confidence: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_usd: Option<f64>,
    #[serde(default)]
    pub reasoning: String,
}

fn unknown_action() -> DecisionAction {
    DecisionAction::Unknown
}

impl Decision {
    /// Synthetic wait decision used whenever parsing or validation degrades.
    pub fn wait(symbol: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            action: DecisionAction::Wait,
            leverage: 0,
            position_size_usd: 0.0,
            stop_loss: 0.0,
            take_profit: 0.0,
            confidence: 0,
            risk_usd: None,
            reasoning: reasoning.into(),
        }
    }
}

/// One complete LLM response: prompt, chain of thought and the decision batch.
/// Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullDecision {
    pub user_prompt: String,
    pub cot_trace: String,
    pub decisions: Vec<Decision>,
    pub timestamp: DateTime<Utc>,
}
