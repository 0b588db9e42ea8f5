//! Orchestration of one decision round: prompts -> LLM -> parse -> vet.

use chrono::Utc;
use tracing::debug;

use crate::domain::FullDecision;
use crate::error::Result;
use crate::llm::ChatCompleter;

use super::context::DecisionContext;
use super::parser::parse_response;
use super::prompt::{build_prompts, PromptRegistry};
use super::validator::vet_decisions;

/// Run one full decision round.
///
/// LLM transport failure (after the client's own retries) is the only error
/// path; parse and validation problems degrade inside the returned batch and
/// never fail the round.
pub async fn decide(
    ctx: &DecisionContext,
    llm: &dyn ChatCompleter,
    prompts: &PromptRegistry,
) -> Result<FullDecision> {
    let (system_prompt, user_prompt) = build_prompts(prompts, ctx);

    let raw = llm.complete(&system_prompt, &user_prompt).await?;
    debug!(chars = raw.len(), "model response received");

    let parsed = parse_response(&raw);
    let decisions = vet_decisions(parsed.decisions, ctx.account.total_equity, &ctx.limits);

    Ok(FullDecision {
        user_prompt,
        cot_trace: parsed.cot_trace,
        decisions,
        timestamp: Utc::now(),
    })
}
