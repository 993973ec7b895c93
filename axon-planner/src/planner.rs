//! The planner contract.

use async_trait::async_trait;

use axon_types::{PlanError, PlanInput, PlanResult, PlanResumeInput};

/// The LLM-driven decision maker.
///
/// A planner returns exactly one of: a final response, tool calls
/// (optionally with `Questions`/`ExternalTools` await items), an
/// await-only queue, or an error. The runtime never sees the planner's
/// reasoning strategy — only these two entry points.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Produce the initial plan for a run.
    async fn plan_start(&self, input: PlanInput) -> Result<PlanResult, PlanError>;

    /// Continue planning after tool results or operator input arrived.
    /// When `input.finalize` is set the planner must produce a final
    /// response and may not request further tools.
    async fn plan_resume(&self, input: PlanResumeInput) -> Result<PlanResult, PlanError>;
}
