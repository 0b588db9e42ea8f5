//! Provider-agnostic LLM chat invocation.

mod client;

pub use client::{ChatCompleter, LlmClient, LlmConfig, LlmProviderKind};
