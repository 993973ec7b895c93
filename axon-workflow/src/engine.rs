//! The workflow engine contract.
//!
//! The loop never assumes a specific engine: a Temporal-style durable
//! engine and the direct inline engine are both viable behind this
//! trait. All non-determinism lives on the other side — time comes from
//! [`WorkflowEngine::now`], waiting from timers and signal channels, and
//! every piece of I/O is an activity whose effect is captured in its
//! return value plus the events it publishes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use axon_hooks::RunEvent;
use axon_types::{
    HookError, PlanError, PlanInput, PlanResult, PlanResumeInput, RunError, RunId, SignalError,
    TokenUsage, ToolCallId, ToolError, ToolEvent, ToolRequest,
};

use crate::input::{RunInput, RunOutput};

/// What a plan activity hands back to the workflow: the planner's
/// decision plus what the event sink captured while it streamed.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PlanActivityOutput {
    /// The planner's decision.
    pub result: PlanResult,
    /// Token usage the sink aggregated across the stream.
    #[serde(default)]
    pub usage: TokenUsage,
    /// Final assistant text captured from the stream, for recovering a
    /// streamed response whose message body arrived empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streamed_text: Option<String>,
}

impl PlanActivityOutput {
    /// An output with no streaming capture.
    pub fn bare(result: PlanResult) -> Self {
        Self {
            result,
            usage: TokenUsage::default(),
            streamed_text: None,
        }
    }
}

/// Retry policy for an activity.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Multiplier applied to the delay after each attempt.
    pub backoff_coefficient: f64,
    /// Attempts before giving up, including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(250),
            backoff_coefficient: 2.0,
            max_attempts: 3,
        }
    }
}

/// Options for scheduling a tool activity.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ActivityOptions {
    /// Task queue, for engines that route by queue.
    pub queue: Option<String>,
    /// Start-to-close timeout for the activity.
    pub timeout: Option<Duration>,
    /// Retry policy, `None` for the engine default.
    pub retry_policy: Option<RetryPolicy>,
}

/// Receive side of a named signal channel.
///
/// Cancellation of the workflow context surfaces as
/// [`SignalError::DeadlineExceeded`], which the loop treats exactly like
/// a timeout: publish a balanced resume and finalize.
#[async_trait]
pub trait SignalReceiver: Send + Sync {
    /// Wait for the next signal, at most `timeout` when one is given.
    async fn receive(&self, timeout: Option<Duration>)
    -> Result<serde_json::Value, SignalError>;

    /// Take a signal if one is already queued, without waiting.
    fn try_receive(&self) -> Result<Option<serde_json::Value>, SignalError>;
}

/// The engine the deterministic loop runs on.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// The workflow clock. The only source of time inside the loop.
    fn now(&self) -> DateTime<Utc>;

    /// A deterministic timer.
    async fn sleep(&self, duration: Duration);

    /// The named signal channel for a run.
    fn signal_channel(&self, run_id: &RunId, name: &str) -> Arc<dyn SignalReceiver>;

    /// Run the initial plan as an activity.
    async fn execute_plan_start(&self, input: PlanInput)
    -> Result<PlanActivityOutput, PlanError>;

    /// Run a plan resume as an activity.
    async fn execute_plan_resume(
        &self,
        input: PlanResumeInput,
    ) -> Result<PlanActivityOutput, PlanError>;

    /// Run one tool call as an activity.
    async fn execute_tool(
        &self,
        request: ToolRequest,
        options: ActivityOptions,
    ) -> Result<ToolEvent, ToolError>;

    /// Run a batch of tool calls. Completion order is the engine's
    /// business; results come back in request order. The default runs
    /// them sequentially.
    async fn execute_tool_batch(
        &self,
        requests: Vec<(ToolRequest, ActivityOptions)>,
    ) -> Vec<Result<ToolEvent, ToolError>> {
        let mut results = Vec::with_capacity(requests.len());
        for (request, options) in requests {
            results.push(self.execute_tool(request, options).await);
        }
        results
    }

    /// Start a nested agent run as a child workflow and wait for it.
    async fn start_child_run(&self, input: RunInput) -> Result<RunOutput, RunError>;

    /// Publish a workflow-originated hook event. Engines schedule this
    /// through an activity so the bus observes it exactly once under
    /// replay.
    async fn publish_hook(&self, event: RunEvent) -> Result<(), HookError>;

    /// Toggle child-event suppression for an agent-as-tool call.
    fn set_child_suppression(&self, parent: ToolCallId, active: bool);

    /// The workflow's cancellation token.
    fn cancellation(&self) -> CancellationToken;
}

/// Name of the control signal channel every run listens on.
pub const CONTROL_SIGNAL: &str = "control";
