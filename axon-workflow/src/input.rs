//! Run submission and the terminal result.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use axon_hooks::CompletionStatus;
use axon_types::{
    AgentSpec, ArtifactsMode, CapsState, Message, PlannerNote, RunId, SessionId,
    TerminationReason, TokenUsage, ToolCallId, ToolEvent,
};

use crate::policy::RunPolicy;

/// A caller's request to run an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInput {
    /// The run's identifier. Nested runs derive theirs from the parent.
    pub run_id: RunId,
    /// The agent configuration to drive.
    pub agent: AgentSpec,
    /// The session this run belongs to.
    pub session_id: SessionId,
    /// Opening messages (typically one user message).
    pub messages: Vec<Message>,
    /// Run caps. Zero fields mean unlimited.
    #[serde(default)]
    pub caps: CapsState,
    /// The run policy.
    #[serde(default)]
    pub policy: RunPolicy,
    /// Labels recorded on the run record.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Metadata recorded on the run record.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Wall-clock budget for the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_budget: Option<Duration>,
    /// Artifact handling for the run's tool calls.
    #[serde(default)]
    pub artifacts_mode: ArtifactsMode,
    /// For nested agent-as-tool runs: the parent call being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_tool_call_id: Option<ToolCallId>,
    /// For nested runs: nested calls the parent's planner anticipated.
    #[serde(default)]
    pub expected_children: u32,
}

impl RunInput {
    /// A minimal input: one user message, unlimited caps, default policy.
    pub fn new(
        run_id: RunId,
        agent: AgentSpec,
        session_id: SessionId,
        user_message: impl Into<String>,
    ) -> Self {
        Self {
            run_id,
            agent,
            session_id,
            messages: vec![Message::text(axon_types::Role::User, user_message)],
            caps: CapsState::unlimited(),
            policy: RunPolicy::default(),
            labels: BTreeMap::new(),
            metadata: BTreeMap::new(),
            time_budget: None,
            artifacts_mode: ArtifactsMode::default(),
            parent_tool_call_id: None,
            expected_children: 0,
        }
    }
}

/// The terminal result of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    /// The run's identifier.
    pub run_id: RunId,
    /// The final assistant message.
    pub final_message: String,
    /// Notes the planner attached to the final response.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<PlannerNote>,
    /// Aggregate token usage across the run.
    pub usage: TokenUsage,
    /// Every tool event the run produced, in execution order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_events: Vec<ToolEvent>,
    /// Why the loop finalized early, when it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination: Option<TerminationReason>,
    /// Terminal status.
    pub status: CompletionStatus,
}
