//! The per-trader agent: cycle engine, order execution, performance stats.

mod agent;
mod executor;
mod performance;

pub use agent::{Agent, AgentConfig, AgentStatus, RiskLimits};
pub use executor::{ExecutionPolicy, OrderExecutor};
pub use performance::{PerformanceAnalyzer, PerformanceReport};
