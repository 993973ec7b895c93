//! Error types for all axon crates.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::id::{AwaitId, RunId, ToolCallId};

/// One field-level problem found while validating a tool payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldIssue {
    /// The offending field, in dotted path form.
    pub field: String,
    /// The field's schema description, when the schema carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Allowed values, for enum-constrained fields.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
    /// Whether the field was absent (as opposed to invalid).
    pub missing: bool,
}

/// Errors from tool codecs.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The payload parsed but violated the schema. Structured: the
    /// issues drive retry-hint construction.
    #[error("invalid payload: {}", issues.iter().map(|i| i.field.as_str()).collect::<Vec<_>>().join(", "))]
    Validation {
        /// The field-level problems.
        issues: Vec<FieldIssue>,
    },
    /// The bytes were not valid JSON, or the JSON shape did not match.
    #[error("malformed payload: {0}")]
    Syntax(String),
    /// No codec is registered for the tool. Decoding without a codec is
    /// a contract violation — there is no silent fallback.
    #[error("no codec registered for tool {0}")]
    MissingCodec(String),
    /// A typed value could not be encoded. Contract violation.
    #[error("encode failed: {0}")]
    Encode(String),
    /// The value handed to the codec was not the type it expects.
    /// Carries the expected type name.
    #[error("type mismatch, expected {0}")]
    TypeMismatch(String),
}

impl CodecError {
    /// The field issues, when this is a structured validation error.
    pub fn issues(&self) -> Option<&[FieldIssue]> {
        match self {
            CodecError::Validation { issues } => Some(issues),
            _ => None,
        }
    }
}

/// Invalid `PlanResult` shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PlanShapeError {
    /// A clarification may not accompany tool calls.
    #[error("plan result mixes a clarification with tool calls")]
    ClarificationWithToolCalls,
    /// A `ToolCalls` result must carry at least one call.
    #[error("plan result has an empty tool call list")]
    EmptyToolCalls,
    /// An await-only result must carry at least one item.
    #[error("plan result has an empty await queue")]
    EmptyAwaitQueue,
}

/// Errors from planner activities.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// The provider rate-limited the request. Returned unchanged so the
    /// engine's retry policy can back off.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Suggested retry delay, if the provider gave one.
        retry_after: Option<Duration>,
    },
    /// The provider failed.
    #[error("provider error: {0}")]
    Provider(String),
    /// The serialized plan input exceeded the activity input budget.
    #[error("plan input of {size} bytes exceeds budget of {max}")]
    InputBudget {
        /// Serialized size of the rejected input.
        size: usize,
        /// The configured maximum.
        max: usize,
    },
    /// The planner returned an invalid result shape.
    #[error(transparent)]
    Shape(#[from] PlanShapeError),
    /// Any other planner error.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl PlanError {
    /// Whether the engine should retry the plan activity.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PlanError::RateLimited { .. } | PlanError::Provider(_))
    }
}

/// Errors from tool dispatch.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The request named no tool.
    #[error("empty tool name")]
    EmptyName,
    /// The tool is not registered and no rewrite applied.
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    /// Agent-as-tool calls must run inline in workflow context, never
    /// through activity dispatch.
    #[error("agent tool {0} routed to activity dispatch")]
    AgentToolViaActivity(String),
    /// A codec contract was violated.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// A bounded tool returned a result with no derivable bounds.
    #[error("bounded tool {0} returned a result without bounds")]
    MissingBounds(String),
    /// The executor failed.
    #[error("execution failed: {0}")]
    Execution(String),
    /// The call was canceled by the workflow context.
    #[error("canceled")]
    Canceled,
    /// The call hit its activity timeout.
    #[error("timeout after {0:?}")]
    Timeout(Duration),
}

/// Why a run cannot accept operator input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotAwaitableReason {
    /// No run with that ID is known.
    UnknownRun,
    /// The run already terminated.
    CompletedRun,
    /// The run is not currently blocked on an await.
    NotWaiting,
}

/// Errors from the await controller and the `Provide*` APIs.
#[derive(Debug, thiserror::Error)]
pub enum AwaitError {
    /// The run cannot accept operator input. Typed so service layers can
    /// distinguish stale or closed runs from dependency failures.
    #[error("run {run_id} is not awaitable: {reason:?}")]
    NotAwaitable {
        /// The targeted run.
        run_id: RunId,
        /// Why input was refused.
        reason: NotAwaitableReason,
        /// Underlying cause, when one exists.
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    /// The provided await ID does not match the pending await.
    #[error("await id mismatch: expected {expected}, got {got}")]
    IdMismatch {
        /// The await the run is blocked on.
        expected: AwaitId,
        /// The await the caller targeted.
        got: AwaitId,
    },
    /// A provided result referenced a tool call that was not awaited.
    #[error("unknown tool call in provided results: {0}")]
    UnknownToolCall(ToolCallId),
    /// A provided result set named the same tool call twice.
    #[error("duplicate tool call in provided results: {0}")]
    DuplicateToolCall(ToolCallId),
    /// An awaited tool call has no result in the provided set.
    #[error("missing result for awaited tool call {0}")]
    MissingToolCall(ToolCallId),
    /// The provided result set was empty.
    #[error("empty result set")]
    EmptyResults,
    /// An awaited external item carries no `tool_call_id`.
    #[error("awaited external tool {0} has no tool_call_id")]
    MissingToolCallId(String),
    /// The awaited tool has no registered spec.
    #[error("no spec registered for awaited tool {0}")]
    MissingSpec(String),
}

/// Errors from toolset registration.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A tool name is already claimed by another toolset.
    #[error("tool {tool} already registered by toolset {existing}")]
    ToolCollision {
        /// The colliding tool name.
        tool: String,
        /// The toolset that registered it first.
        existing: String,
    },
}

/// Errors from runtime policy decisions.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// The policy itself failed to produce a decision.
    #[error("policy decision failed: {0}")]
    DecisionFailed(String),
}

/// Errors from hook publication and subscribers.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// Publishing the event failed.
    #[error("hook publish failed: {0}")]
    Publish(String),
    /// A subscriber failed. Logged, never fatal to the run.
    #[error("hook subscriber failed: {0}")]
    Subscriber(String),
}

/// Errors from run-store reads and writes.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No record for the run.
    #[error("run not found: {0}")]
    NotFound(RunId),
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Any other store error.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// Errors from signal channel receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SignalError {
    /// The receive timed out or was canceled. The loop treats both the
    /// same way: publish a balanced resume and finalize.
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// The channel is closed.
    #[error("channel closed")]
    Closed,
}

/// Run-level failures.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// A policy decision disabled tool execution.
    #[error("tool execution disabled by policy")]
    ToolsDisabled,
    /// Per-turn policy filtering left no executable calls.
    #[error("no tools allowed for execution")]
    NoToolsAllowed,
    /// A planner activity failed terminally.
    #[error(transparent)]
    Plan(#[from] PlanError),
    /// A tool dispatch failed terminally.
    #[error(transparent)]
    Tool(#[from] ToolError),
    /// An await contract was violated.
    #[error(transparent)]
    Await(#[from] AwaitError),
    /// A policy could not decide.
    #[error(transparent)]
    Policy(#[from] PolicyError),
    /// The run was canceled.
    #[error("canceled")]
    Canceled,
    /// Any other run failure.
    #[error("{0}")]
    Internal(String),
}
