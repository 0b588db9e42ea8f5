//! Exchange adapter seam and the in-process paper-trading implementation.

mod paper;
mod traits;

pub use paper::PaperExchange;
pub use traits::{AccountBalance, ContractSpec, ExchangeAdapter, OrderAck};
