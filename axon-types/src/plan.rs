//! The planner contract types: plan inputs, plan results, and the await
//! queue shapes a planner may request.

use serde::{Deserialize, Serialize};

use crate::error::PlanShapeError;
use crate::id::{AgentId, AwaitId, RunId, SessionId, ToolCallId, TurnId};
use crate::message::Message;
use crate::tool::{ToolEvent, ToolRequest};

/// A note the planner attaches to its output. Notes are surfaced as
/// `PlannerNote` events; `code` carries machine-readable markers such as
/// `rate_limited`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerNote {
    /// Machine-readable marker, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable note text.
    pub text: String,
}

impl PlannerNote {
    /// A plain text note.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            code: None,
            text: text.into(),
        }
    }

    /// A coded note.
    pub fn coded(code: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            text: text.into(),
        }
    }
}

/// The planner's final answer for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinalResponse {
    /// Final assistant message body. May be empty when the response was
    /// streamed; the loop then recovers the text from the transcript.
    pub message: String,
    /// Notes the planner wants recorded alongside the response.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<PlannerNote>,
    /// Whether the response body was already streamed to the event sink.
    #[serde(default)]
    pub streamed: bool,
}

/// A provider-native structured question for the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    /// Question identifier, unique within the await item.
    pub id: String,
    /// The question text.
    pub prompt: String,
    /// Allowed answers, when the question is multiple-choice.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

/// A tool call to be satisfied outside the runtime (by an operator or an
/// external system) rather than dispatched to a registered executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalToolCall {
    /// Fully-qualified tool name.
    pub name: String,
    /// Correlation ID the provider of the result must echo back.
    pub tool_call_id: ToolCallId,
    /// Canonical JSON payload describing the requested work.
    pub payload: serde_json::Value,
}

/// One item in the planner's await queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AwaitItem {
    /// Free-text clarification from the operator.
    Clarification {
        /// What the planner needs clarified.
        prompt: String,
        /// The tool call the clarification relates to, when any.
        tool_call_id: Option<ToolCallId>,
    },
    /// Structured questions for the operator.
    Questions {
        /// The questions, answered as a set.
        questions: Vec<Question>,
    },
    /// Tool calls satisfied externally.
    ExternalTools {
        /// The calls awaiting results.
        calls: Vec<ExternalToolCall>,
    },
}

/// The resolution of one await item, provided through the `Provide*` APIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AwaitResolution {
    /// Answer to a clarification.
    Clarification {
        /// The await the answer targets.
        await_id: AwaitId,
        /// The operator's answer.
        answer: String,
    },
    /// Answers to structured questions, keyed by question ID.
    Answers {
        /// The await the answers target.
        await_id: AwaitId,
        /// `question id → answer` pairs.
        answers: Vec<(String, String)>,
    },
    /// Results for externally-satisfied tool calls.
    ToolResults {
        /// The await the results target.
        await_id: AwaitId,
        /// One result per awaited call.
        results: Vec<ExternalToolResult>,
    },
    /// A confirmation decision.
    Confirmation {
        /// The await the decision targets.
        await_id: AwaitId,
        /// Whether the operator approved the call.
        approved: bool,
        /// Who made the decision.
        requested_by: String,
    },
}

/// One externally-provided tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalToolResult {
    /// Must match an awaited `ExternalToolCall::tool_call_id`.
    pub tool_call_id: ToolCallId,
    /// Fully-qualified tool name.
    pub name: String,
    /// Canonical JSON result.
    pub result: serde_json::Value,
}

/// What the planner decided for this turn.
///
/// A planner returns exactly one shape. `ToolCalls` may carry an await
/// queue of `Questions`/`ExternalTools` items; a `Clarification` item can
/// only appear await-only — [`PlanResult::validate`] enforces this.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanResult {
    /// The run is done; emit the final assistant message.
    FinalResponse(FinalResponse),
    /// Execute tool calls, then resume planning.
    ToolCalls {
        /// The calls to dispatch, in planner order.
        calls: Vec<ToolRequest>,
        /// Await items to satisfy after the calls execute.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        await_queue: Vec<AwaitItem>,
        /// Anticipated nested tool calls, for parent tracking of
        /// agent-as-tool invocations.
        #[serde(default)]
        expected_children: u32,
    },
    /// Block on operator input without executing anything.
    Await {
        /// The items to satisfy, in declaration order.
        queue: Vec<AwaitItem>,
    },
}

impl PlanResult {
    /// Reject invalid mixed shapes: a clarification may not accompany tool
    /// calls, and an await-only result must have a non-empty queue.
    pub fn validate(&self) -> Result<(), PlanShapeError> {
        match self {
            PlanResult::FinalResponse(_) => Ok(()),
            PlanResult::ToolCalls {
                calls, await_queue, ..
            } => {
                if calls.is_empty() {
                    return Err(PlanShapeError::EmptyToolCalls);
                }
                if await_queue
                    .iter()
                    .any(|item| matches!(item, AwaitItem::Clarification { .. }))
                {
                    return Err(PlanShapeError::ClarificationWithToolCalls);
                }
                Ok(())
            }
            PlanResult::Await { queue } => {
                if queue.is_empty() {
                    return Err(PlanShapeError::EmptyAwaitQueue);
                }
                Ok(())
            }
        }
    }
}

/// Why the loop is asking the planner to wrap up instead of continuing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The tool call budget is exhausted.
    ToolCap,
    /// Too many consecutive failed tool calls.
    FailureCap,
    /// The run's wall-clock budget is exhausted.
    TimeBudget,
    /// An await was not satisfied in time.
    AwaitTimeout,
    /// A confirmation was not decided in time.
    ConfirmationTimeout,
    /// A clarification was not answered in time.
    ClarificationTimeout,
}

impl TerminationReason {
    /// Stable string form, used in events and reminders.
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationReason::ToolCap => "tool_cap",
            TerminationReason::FailureCap => "failure_cap",
            TerminationReason::TimeBudget => "time_budget",
            TerminationReason::AwaitTimeout => "await_timeout",
            TerminationReason::ConfirmationTimeout => "confirmation_timeout",
            TerminationReason::ClarificationTimeout => "clarification_timeout",
        }
    }
}

/// Identifier bundle describing where in a run a plan activity executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    /// The run being planned.
    pub run_id: RunId,
    /// The agent configuration driving the run.
    pub agent_id: AgentId,
    /// The session the run belongs to.
    pub session_id: SessionId,
    /// The current turn, when one is active.
    pub turn_id: Option<TurnId>,
    /// Plan attempt counter, advanced on every resume.
    pub attempt: u32,
}

/// A named planner configuration: which toolsets it may call and any
/// planner-specific options, opaque to the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    /// The agent's identifier.
    pub agent_id: AgentId,
    /// Toolsets registered for this agent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub toolsets: Vec<String>,
    /// System prompt prefix for the transcript, when the agent has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Opaque planner options (model hints, temperature, and so on).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
}

impl Default for AgentSpec {
    fn default() -> Self {
        Self {
            agent_id: AgentId::new(""),
            toolsets: Vec::new(),
            system_prompt: None,
            options: None,
        }
    }
}

/// Input to the initial plan activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanInput {
    /// The rehydrated transcript the planner sees.
    pub messages: Vec<Message>,
    /// Where in the run this plan executes.
    pub context: RunContext,
    /// The agent configuration.
    pub agent: AgentSpec,
    /// Prior tool events the planner should account for.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<ToolEvent>,
    /// System-role reminder messages (retry hints, bounds).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reminders: Vec<Message>,
}

/// Input to a plan-resume activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResumeInput {
    /// The shared plan input.
    pub base: PlanInput,
    /// Results of the tool calls executed since the last plan.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolEvent>,
    /// When set, the planner must produce a final response and may not
    /// request more tools; carries the reason the loop is terminating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalize: Option<TerminationReason>,
}
