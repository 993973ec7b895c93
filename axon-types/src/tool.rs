//! Tool invocation payloads: requests, serialized result envelopes,
//! retry hints, bounds, artifacts, and telemetry.

use serde::{Deserialize, Serialize};

use crate::id::{AgentId, RunId, SessionId, ToolCallId, TurnId};

/// How artifacts produced by tools are handled for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactsMode {
    /// Artifacts are carried inline on the tool event.
    #[default]
    Inline,
    /// Artifacts are dropped before the event crosses the workflow boundary.
    Discard,
}

/// A tool invocation request.
///
/// Produced by the planner with `name` and `payload`; the workflow loop
/// fills in the identifier fields before dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Fully-qualified tool name (`service.toolset.tool`).
    pub name: String,
    /// Canonical JSON payload for the tool.
    pub payload: serde_json::Value,
    /// The run this call belongs to.
    pub run_id: RunId,
    /// The agent driving the run.
    pub agent_id: AgentId,
    /// The session the run belongs to.
    pub session_id: SessionId,
    /// The turn this call was planned in, when known.
    pub turn_id: Option<TurnId>,
    /// Identifier for this call. Supplied by the planner for correlation
    /// with provider-native tool calls, or derived deterministically.
    pub tool_call_id: Option<ToolCallId>,
    /// For nested calls, the parent agent-as-tool call.
    pub parent_tool_call_id: Option<ToolCallId>,
    /// Artifact handling for this call.
    #[serde(default)]
    pub artifacts_mode: ArtifactsMode,
}

impl ToolRequest {
    /// A bare request as a planner would emit it: name and payload only.
    /// Identifier fields are stamped by the workflow loop.
    pub fn bare(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
            run_id: RunId::new(""),
            agent_id: AgentId::new(""),
            session_id: SessionId::new(""),
            turn_id: None,
            tool_call_id: None,
            parent_tool_call_id: None,
            artifacts_mode: ArtifactsMode::default(),
        }
    }
}

/// Identifier bundle handed to executors alongside the payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallMeta {
    /// The run this call belongs to.
    pub run_id: RunId,
    /// The session the run belongs to.
    pub session_id: SessionId,
    /// The turn this call was planned in, when known.
    pub turn_id: Option<TurnId>,
    /// Identifier for this call.
    pub tool_call_id: ToolCallId,
    /// For nested calls, the parent agent-as-tool call.
    pub parent_tool_call_id: Option<ToolCallId>,
}

/// Why a retry hint was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryReason {
    /// Required fields were absent from the payload.
    MissingFields,
    /// Fields were present but carried invalid values.
    InvalidArguments,
}

/// A structured explanation attached to a failed tool call so the planner
/// can correct itself and retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryHint {
    /// Why the call failed.
    pub reason: RetryReason,
    /// Fields that were missing or invalid. `$payload` means the whole
    /// payload failed to parse.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_fields: Vec<String>,
    /// A descriptive question the planner can relay to the operator,
    /// covering up to three fields with their allowed values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarifying_question: Option<String>,
    /// The tool the hint applies to.
    pub tool: String,
    /// Example payload from the tool spec, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example_input: Option<serde_json::Value>,
}

/// First-class return metadata for tools that page or truncate results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Number of items returned.
    pub returned: u64,
    /// Total available, when the tool knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    /// Whether the result was truncated.
    pub truncated: bool,
    /// Cursor for the next page, when paging is supported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    /// Suggestion for refining the query instead of paging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refine_hint: Option<String>,
}

/// Execution telemetry attached to a tool result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolTelemetry {
    /// Wall-clock duration of the execution in milliseconds.
    pub duration_ms: u64,
    /// Model used, when the tool invoked one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Tokens consumed, when the tool invoked a model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
}

impl ToolTelemetry {
    /// Aggregate another telemetry record into this one. Durations add,
    /// token counts add, the model name is kept if unambiguous.
    pub fn absorb(&mut self, other: &ToolTelemetry) {
        self.duration_ms = self.duration_ms.saturating_add(other.duration_ms);
        if let Some(tokens) = other.tokens_used {
            *self.tokens_used.get_or_insert(0) += tokens;
        }
        match (&self.model, &other.model) {
            (None, Some(m)) => self.model = Some(m.clone()),
            (Some(a), Some(b)) if a != b => self.model = None,
            _ => {}
        }
    }
}

/// A named artifact produced by a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Artifact name, unique within the call.
    pub name: String,
    /// MIME type of the data.
    pub media_type: String,
    /// Canonical JSON data.
    pub data: serde_json::Value,
}

/// The serialize-safe envelope of a tool execution outcome.
///
/// This is what crosses the workflow boundary: the decoded typed result
/// is reduced to canonical JSON, errors to strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEvent {
    /// Fully-qualified tool name.
    pub name: String,
    /// Identifier for the call this event answers.
    pub tool_call_id: ToolCallId,
    /// Canonical JSON result. `None` when the call failed before
    /// producing one or the result was omitted for planning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error message, when the call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Structured retry guidance, when the failure is correctable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_hint: Option<RetryHint>,
    /// Artifacts produced by the call.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
    /// Result bounds for bounded tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
    /// Execution telemetry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<ToolTelemetry>,
    /// Number of nested calls the execution spawned.
    #[serde(default)]
    pub children_count: u32,
    /// Link to the nested run, for agent-as-tool calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_link: Option<RunId>,
    /// Set when the result was dropped to fit the planning input budget.
    #[serde(default)]
    pub result_omitted: bool,
    /// Why the result was omitted, when it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub omitted_reason: Option<String>,
}

impl ToolEvent {
    /// Whether this event represents a failed call.
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}
