//! Core data model shared across the harness.

mod account;
mod decision;
mod kline;
mod market;
mod record;

pub use account::{AccountInfo, PositionInfo, PositionSide};
pub use decision::{CandidateCoin, CandidateSource, Decision, DecisionAction, FullDecision};
pub use kline::{is_ordered_series, Kline};
pub use market::{MarketSnapshot, OpenInterest, TimeframeSeries};
pub use record::{ActionOutcome, CycleRecord};
