//! The closed hook event taxonomy.
//!
//! Every event carries the same [`EventMeta`] base — run, agent,
//! session, turn, a per-turn monotonic sequence number, and an epoch-ms
//! timestamp — so adding an event kind is a single variant here, not a
//! type switch scattered over the codebase. Durable serialization uses
//! a per-type JSON envelope tagged with `type`; `run_completed` carries
//! its error as a plain string.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use axon_types::{
    AgentId, AwaitId, Bounds, ExternalToolCall, Question, RetryHint, RunId, SessionId, TokenUsage,
    ToolCallId, ToolTelemetry, TurnId,
};

/// Turn tracking shared by every event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMeta {
    /// The run the event belongs to.
    pub run_id: RunId,
    /// The agent driving the run.
    pub agent_id: AgentId,
    /// The session the run belongs to.
    pub session_id: SessionId,
    /// The turn the event was issued in, when one is active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<TurnId>,
    /// Per-turn monotonic sequence number, starting at 1. Stamped by
    /// the bus.
    #[serde(default)]
    pub sequence: u64,
    /// Epoch milliseconds. Stamped by the bus when zero.
    #[serde(default)]
    pub timestamp_ms: i64,
}

impl EventMeta {
    /// Meta for a run with no active turn. Sequence and timestamp are
    /// stamped at publish time.
    pub fn new(run_id: RunId, agent_id: AgentId, session_id: SessionId) -> Self {
        Self {
            run_id,
            agent_id,
            session_id,
            turn_id: None,
            sequence: 0,
            timestamp_ms: 0,
        }
    }

    /// Attach a turn.
    #[must_use]
    pub fn with_turn(mut self, turn_id: TurnId) -> Self {
        self.turn_id = Some(turn_id);
        self
    }
}

/// Terminal status reported by a `RunCompleted` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    /// The run produced a final response.
    Success,
    /// The run failed.
    Failed,
    /// The run was canceled.
    Canceled,
}

/// Event-specific payloads. Closed set — subscribers can match
/// exhaustively.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A run began executing.
    RunStarted {
        /// Labels attached at submission.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        labels: BTreeMap<String, String>,
    },
    /// The run moved to a new lifecycle phase.
    RunPhaseChanged {
        /// The new phase.
        phase: String,
    },
    /// The run paused.
    RunPaused {
        /// Why the run paused.
        reason: String,
        /// Who requested the pause.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        requested_by: Option<String>,
        /// Labels attached by the pause request.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        labels: BTreeMap<String, String>,
        /// Metadata attached by the pause request.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        metadata: BTreeMap<String, serde_json::Value>,
    },
    /// The run resumed. Every `RunPaused` is balanced by exactly one of
    /// these.
    RunResumed {
        /// Why the run resumed (`resume_request`, `await_timeout`, ...).
        reason: String,
    },
    /// The run terminated.
    RunCompleted {
        /// Terminal status.
        status: CompletionStatus,
        /// Error message for failed runs. A string because errors are
        /// not directly serializable.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// Aggregate token usage for the run.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<TokenUsage>,
    },
    /// A nested agent-as-tool run began.
    AgentRunStarted {
        /// The parent run.
        parent_run_id: RunId,
        /// The agent tool that spawned the nested run.
        tool: String,
    },
    /// The planner is blocked on a free-text clarification.
    AwaitClarification {
        /// The await barrier's ID.
        await_id: AwaitId,
        /// What the planner needs clarified.
        prompt: String,
        /// The tool call the clarification relates to, when any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<ToolCallId>,
    },
    /// The planner is blocked on structured questions.
    AwaitQuestions {
        /// The await barrier's ID.
        await_id: AwaitId,
        /// The questions to answer.
        questions: Vec<Question>,
    },
    /// A tool call is blocked on operator confirmation.
    AwaitConfirmation {
        /// The await barrier's ID.
        await_id: AwaitId,
        /// The call awaiting confirmation.
        tool_call_id: ToolCallId,
        /// Confirmation title.
        title: String,
        /// Rendered confirmation prompt.
        prompt: String,
    },
    /// The planner is blocked on externally-satisfied tool calls.
    AwaitExternalTools {
        /// The await barrier's ID.
        await_id: AwaitId,
        /// The calls awaiting results.
        calls: Vec<ExternalToolCall>,
    },
    /// An operator decided a confirmation.
    ToolAuthorization {
        /// The call that was decided.
        tool_call_id: ToolCallId,
        /// Whether the call may execute.
        approved: bool,
        /// Who decided.
        requested_by: String,
    },
    /// The planner produced assistant-visible text.
    AssistantMessage {
        /// The message text.
        text: String,
        /// Whether the text was streamed in chunks beforehand.
        #[serde(default)]
        streamed: bool,
    },
    /// A planner note.
    PlannerNote {
        /// Machine-readable marker, when present.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        /// The note text.
        text: String,
    },
    /// A structured thinking block from the planner.
    ThinkingBlock {
        /// Position of the block in the response.
        index: u32,
        /// Thinking text, absent for redacted blocks.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        /// Provider signature, when present.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
        /// Opaque redacted bytes, for redacted blocks.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        redacted: Option<String>,
        /// Whether this is the final fragment of the block.
        #[serde(rename = "final", default)]
        final_: bool,
    },
    /// A tool call was handed to execution.
    ToolCallScheduled {
        /// The call's ID.
        tool_call_id: ToolCallId,
        /// The tool being called.
        tool: String,
        /// Canonical JSON payload.
        payload: serde_json::Value,
        /// The parent agent-as-tool call, for nested calls.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_tool_call_id: Option<ToolCallId>,
    },
    /// Parent tracking for a nested call was updated.
    ToolCallUpdated {
        /// The parent call.
        tool_call_id: ToolCallId,
        /// New expected total of nested calls.
        expected_children: u32,
    },
    /// Best-effort streaming fragment of a tool call's arguments.
    /// Consumers may ignore these; the canonical call is the finalized
    /// one.
    ToolCallArgsDelta {
        /// The call being streamed.
        tool_call_id: ToolCallId,
        /// The JSON fragment.
        delta: String,
    },
    /// A tool call produced its result.
    ToolResultReceived {
        /// The call's ID.
        tool_call_id: ToolCallId,
        /// The tool that was called.
        tool: String,
        /// Canonical JSON result, absent on failure.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        /// Error message, when the call failed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// Result bounds, for bounded tools.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bounds: Option<Bounds>,
        /// Execution telemetry.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        telemetry: Option<ToolTelemetry>,
        /// The parent agent-as-tool call, for nested calls.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_tool_call_id: Option<ToolCallId>,
    },
    /// A runtime policy decided this turn.
    PolicyDecision {
        /// Tools the policy allows, `None` for no restriction.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        allowed_tools: Option<Vec<String>>,
        /// Whether the policy disabled tool execution outright.
        #[serde(default)]
        disable_tools: bool,
        /// Labels the decision attaches to the run.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        labels: BTreeMap<String, String>,
        /// Metadata the decision attaches to the run.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        metadata: BTreeMap<String, serde_json::Value>,
    },
    /// A retry hint was attached to a tool result.
    RetryHintIssued {
        /// The call the hint applies to.
        tool_call_id: ToolCallId,
        /// The hint.
        hint: RetryHint,
    },
    /// A memory entry was appended for the run.
    MemoryAppended {
        /// Store key, when the backend uses one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        /// The appended entry.
        entry: serde_json::Value,
    },
    /// Token usage delta.
    Usage {
        /// The usage observed since the last report.
        usage: TokenUsage,
    },
    /// The hard-protection threshold for failing nested work tripped.
    HardProtectionTriggered {
        /// Failing calls observed in the batch.
        failed_calls: u32,
        /// The configured threshold.
        threshold: u32,
    },
}

/// One event on the hook bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    /// Turn tracking.
    #[serde(flatten)]
    pub meta: EventMeta,
    /// The event payload.
    #[serde(flatten)]
    pub kind: EventKind,
}

impl RunEvent {
    /// An event awaiting sequence/timestamp stamping by the bus.
    pub fn new(meta: EventMeta, kind: EventKind) -> Self {
        Self { meta, kind }
    }

    /// The parent tool call this event is attributed to, for the kinds
    /// that child-event suppression filters.
    pub fn suppressible_parent(&self) -> Option<&ToolCallId> {
        match &self.kind {
            EventKind::ToolCallScheduled {
                parent_tool_call_id,
                ..
            }
            | EventKind::ToolResultReceived {
                parent_tool_call_id,
                ..
            } => parent_tool_call_id.as_ref(),
            _ => None,
        }
    }
}
