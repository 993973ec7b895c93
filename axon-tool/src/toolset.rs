//! Toolset registrations: the executor and adapters shared by a group
//! of tools.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use axon_types::{Artifact, RetryHint, ToolCallMeta, ToolTelemetry};

use crate::codec::ToolValue;
use crate::spec::ToolSpec;

/// The payload an executor receives: raw canonical JSON when the toolset
/// decodes in the executor, the codec-decoded typed value otherwise.
pub enum DecodedPayload {
    /// Canonical JSON, untouched by the runtime.
    Raw(serde_json::Value),
    /// The typed value the payload codec produced.
    Typed(Box<dyn Any + Send>),
}

impl DecodedPayload {
    /// Borrow the raw JSON, when this payload was not decoded.
    pub fn as_raw(&self) -> Option<&serde_json::Value> {
        match self {
            DecodedPayload::Raw(value) => Some(value),
            DecodedPayload::Typed(_) => None,
        }
    }

    /// Downcast the typed value.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        match self {
            DecodedPayload::Raw(_) => None,
            DecodedPayload::Typed(value) => value.downcast_ref::<T>(),
        }
    }
}

impl std::fmt::Debug for DecodedPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodedPayload::Raw(value) => f.debug_tuple("Raw").field(value).finish(),
            DecodedPayload::Typed(_) => f.debug_struct("Typed").finish_non_exhaustive(),
        }
    }
}

/// One tool invocation as the executor sees it.
#[derive(Debug)]
pub struct ToolInvocation {
    /// Fully-qualified tool name.
    pub name: String,
    /// The payload, decoded per the toolset's `decode_in_executor` flag.
    pub payload: DecodedPayload,
    /// Identifier bundle for the call.
    pub meta: ToolCallMeta,
    /// Canceled when the workflow context is canceled.
    pub cancel: CancellationToken,
}

/// What an executor returns.
pub struct ExecutionOutput {
    /// The result value, absent on failure.
    pub result: Option<ToolValue>,
    /// Artifacts produced alongside the result.
    pub artifacts: Vec<Artifact>,
    /// Telemetry, when the executor measured its own work.
    pub telemetry: Option<ToolTelemetry>,
    /// Error message, when the call failed.
    pub error: Option<String>,
    /// Retry guidance, when the failure is correctable.
    pub retry_hint: Option<RetryHint>,
    /// Number of nested calls the execution spawned.
    pub children_count: u32,
}

impl ExecutionOutput {
    /// A successful output carrying only a result.
    pub fn ok(result: ToolValue) -> Self {
        Self {
            result: Some(result),
            artifacts: Vec::new(),
            telemetry: None,
            error: None,
            retry_hint: None,
            children_count: 0,
        }
    }

    /// A failed output carrying only an error message.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            result: None,
            artifacts: Vec::new(),
            telemetry: None,
            error: Some(error.into()),
            retry_hint: None,
            children_count: 0,
        }
    }
}

/// Executes the tools of one toolset.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute one call. Failures are reported through
    /// [`ExecutionOutput::error`], not by panicking.
    async fn execute(&self, invocation: ToolInvocation) -> ExecutionOutput;
}

/// Rewrites a raw JSON payload before validation and dispatch.
pub trait PayloadAdapter: Send + Sync {
    /// Transform the payload. An error surfaces as a failed tool result.
    fn adapt(
        &self,
        tool: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, Box<dyn std::error::Error + Send + Sync>>;
}

/// Rewrites the canonical JSON result after encoding.
pub trait ResultAdapter: Send + Sync {
    /// Transform the encoded result.
    fn adapt(
        &self,
        tool: &str,
        result: serde_json::Value,
    ) -> Result<serde_json::Value, Box<dyn std::error::Error + Send + Sync>>;
}

/// Builds telemetry for executions that did not measure their own.
pub trait TelemetryBuilder: Send + Sync {
    /// Build telemetry from the dispatch window and call identifiers.
    fn build(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        meta: &ToolCallMeta,
    ) -> ToolTelemetry;
}

/// A named collection of tools sharing an executor and optional adapters.
#[derive(Clone)]
pub struct ToolsetRegistration {
    /// Toolset name, unique per registry.
    pub name: String,
    /// The tools this toolset provides.
    pub tools: Vec<ToolSpec>,
    /// The executor for every tool in the set.
    pub executor: Arc<dyn ToolExecutor>,
    /// Payload rewrite applied before validation.
    pub payload_adapter: Option<Arc<dyn PayloadAdapter>>,
    /// Result rewrite applied after encoding.
    pub result_adapter: Option<Arc<dyn ResultAdapter>>,
    /// Telemetry fallback for executions that produced none.
    pub telemetry_builder: Option<Arc<dyn TelemetryBuilder>>,
    /// Skip eager payload decoding; the executor receives raw JSON.
    pub decode_in_executor: bool,
    /// Collapse child events of agent-as-tool calls into the parent's
    /// aggregated result on the external stream.
    pub suppress_child_events: bool,
}

impl ToolsetRegistration {
    /// A registration with the given name, tools, and executor.
    pub fn new(
        name: impl Into<String>,
        tools: Vec<ToolSpec>,
        executor: Arc<dyn ToolExecutor>,
    ) -> Self {
        Self {
            name: name.into(),
            tools,
            executor,
            payload_adapter: None,
            result_adapter: None,
            telemetry_builder: None,
            decode_in_executor: false,
            suppress_child_events: false,
        }
    }

    /// Attach a payload adapter.
    #[must_use]
    pub fn with_payload_adapter(mut self, adapter: Arc<dyn PayloadAdapter>) -> Self {
        self.payload_adapter = Some(adapter);
        self
    }

    /// Attach a result adapter.
    #[must_use]
    pub fn with_result_adapter(mut self, adapter: Arc<dyn ResultAdapter>) -> Self {
        self.result_adapter = Some(adapter);
        self
    }

    /// Attach a telemetry fallback.
    #[must_use]
    pub fn with_telemetry_builder(mut self, builder: Arc<dyn TelemetryBuilder>) -> Self {
        self.telemetry_builder = Some(builder);
        self
    }

    /// Decode payloads in the executor instead of eagerly.
    #[must_use]
    pub fn decode_in_executor(mut self) -> Self {
        self.decode_in_executor = true;
        self
    }

    /// Suppress child events for this toolset's agent tools.
    #[must_use]
    pub fn suppress_child_events(mut self) -> Self {
        self.suppress_child_events = true;
        self
    }
}
