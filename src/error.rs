use thiserror::Error;

/// Main error type for the trading harness
#[derive(Error, Debug)]
pub enum GauntletError {
    // Configuration errors (fatal at startup only)
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Market data errors (symbol level; dropping the symbol is the remedy)
    #[error("Market data unavailable: {0}")]
    MarketData(String),

    #[error("Market data provider '{0}' not found")]
    ProviderNotFound(String),

    // LLM errors (cycle level; the cycle is recorded as failed)
    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    // Parse errors (degraded to a synthetic wait decision, never fatal)
    #[error("Response parse error: {0}")]
    Parse(String),

    // Validation errors (decision level; the decision is dropped)
    #[error("Validation failed: {0}")]
    Validation(String),

    // Exchange errors (action level; the outcome is recorded as failed)
    #[error("Exchange error: {0}")]
    Exchange(String),

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    // Risk gate
    #[error("Trading halted: {0}")]
    TradingHalted(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for GauntletError
pub type Result<T> = std::result::Result<T, GauntletError>;

/// Error substrings that identify transient transport failures.
///
/// Only these are retried by the LLM client; upstream protocol errors
/// (a non-2xx with a structured body) are surfaced immediately.
const TRANSIENT_MARKERS: &[&str] = &[
    "EOF",
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "temporary failure",
    "no such host",
];

impl GauntletError {
    /// Whether this error represents a transient transport failure worth retrying.
    pub fn is_transient(&self) -> bool {
        if let GauntletError::Http(e) = self {
            if e.is_timeout() || e.is_connect() {
                return true;
            }
        }
        let msg = self.to_string();
        TRANSIENT_MARKERS.iter().any(|m| msg.contains(m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification_matches_marker_list() {
        assert!(GauntletError::LlmProvider("unexpected EOF".into()).is_transient());
        assert!(GauntletError::LlmProvider("request timed out".into()).is_transient());
        assert!(GauntletError::Internal("connection reset by peer".into()).is_transient());
        assert!(!GauntletError::LlmProvider("API returned status 400".into()).is_transient());
        assert!(!GauntletError::Validation("leverage out of range".into()).is_transient());
    }
}
