//! The dispatch pipeline: one tool call in, one tool event out.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use axon_types::{
    ArtifactsMode, Bounds, CodecError, ToolCallId, ToolCallMeta, ToolError, ToolEvent, ToolRequest,
};

use crate::codec::ToolValue;
use crate::hint::hint_for_decode_error;
use crate::registry::{CodecKind, ToolRegistry};
use crate::toolset::{DecodedPayload, ExecutionOutput, ToolInvocation};

/// How a call reached the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    /// True when the call arrived through activity dispatch. Agent-as-tool
    /// calls must not — they run inline so child workflows can start.
    pub via_activity: bool,
    /// Canceled when the workflow context is canceled.
    pub cancel: CancellationToken,
}

impl Default for DispatchContext {
    fn default() -> Self {
        Self {
            via_activity: true,
            cancel: CancellationToken::new(),
        }
    }
}

/// Executes one tool call end to end: adapters, validation, execution,
/// encoding, telemetry, bounds.
///
/// Planner-correctable failures come back as an `Ok` event carrying an
/// error (and usually a retry hint); contract violations come back as
/// `Err` and the workflow decides whether they fail the turn or the run.
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
}

impl Dispatcher {
    /// A dispatcher over the given registry.
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// The registry this dispatcher consults.
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Dispatch one call.
    pub async fn dispatch(
        &self,
        request: &ToolRequest,
        ctx: DispatchContext,
    ) -> Result<ToolEvent, ToolError> {
        if request.name.is_empty() {
            return Err(ToolError::EmptyName);
        }

        let spec = self
            .registry
            .tool_spec(&request.name)
            .ok_or_else(|| ToolError::UnknownTool(request.name.clone()))?;
        if spec.is_agent_tool && ctx.via_activity {
            return Err(ToolError::AgentToolViaActivity(request.name.clone()));
        }
        let toolset = self
            .registry
            .toolset(&spec.toolset)
            .ok_or_else(|| ToolError::UnknownTool(request.name.clone()))?;

        let tool_call_id = request.tool_call_id.clone().unwrap_or_else(|| {
            ToolCallId::derive(&request.run_id, request.turn_id.as_ref(), &request.name, 0)
        });
        let meta = ToolCallMeta {
            run_id: request.run_id.clone(),
            session_id: request.session_id.clone(),
            turn_id: request.turn_id.clone(),
            tool_call_id: tool_call_id.clone(),
            parent_tool_call_id: request.parent_tool_call_id.clone(),
        };

        let mut payload = request.payload.clone();
        if let Some(adapter) = &toolset.payload_adapter {
            match adapter.adapt(&request.name, payload) {
                Ok(adapted) => payload = adapted,
                Err(e) => {
                    return Ok(failure_event(
                        request,
                        tool_call_id,
                        format!("payload adapter failed: {e}"),
                        None,
                    ));
                }
            }
        }

        // Eager validation: decode through the codec unless the toolset
        // does its own decoding or there is nothing to decode.
        let decoded = if !toolset.decode_in_executor && !payload.is_null() {
            let raw =
                serde_json::to_vec(&payload).map_err(|e| CodecError::Encode(e.to_string()))?;
            match spec.payload.decode(&raw) {
                Ok(typed) => DecodedPayload::Typed(typed),
                Err(err @ (CodecError::Validation { .. } | CodecError::Syntax(_))) => {
                    let hint =
                        hint_for_decode_error(&request.name, &err, spec.payload.example.as_ref());
                    debug!(tool = %request.name, error = %err, "payload rejected before dispatch");
                    return Ok(failure_event(request, tool_call_id, err.to_string(), hint));
                }
                Err(contract) => return Err(ToolError::Codec(contract)),
            }
        } else {
            DecodedPayload::Raw(payload)
        };

        let start = Utc::now();
        let output = toolset
            .executor
            .execute(ToolInvocation {
                name: request.name.clone(),
                payload: decoded,
                meta: meta.clone(),
                cancel: ctx.cancel.clone(),
            })
            .await;
        let end = Utc::now();

        if ctx.cancel.is_cancelled() {
            return Err(ToolError::Canceled);
        }

        let ExecutionOutput {
            result,
            artifacts,
            mut telemetry,
            error,
            retry_hint,
            children_count,
        } = output;

        if telemetry.is_none() {
            if let Some(builder) = &toolset.telemetry_builder {
                telemetry = Some(builder.build(start, end, &meta));
            }
        }

        if let Some(message) = error {
            let mut event = failure_event(request, tool_call_id, message, retry_hint);
            event.telemetry = telemetry;
            event.children_count = children_count;
            return Ok(event);
        }

        // Encode the typed result. A codec failure here is a contract
        // violation, not something the planner can correct.
        let (result_json, bounds) = match result {
            Some(value) => {
                let bounds = self.derive_bounds(&spec, &value)?;
                let raw = self
                    .registry
                    .marshal_tool_value(&request.name, &value, CodecKind::Result)
                    .map_err(ToolError::Codec)?;
                let mut json: serde_json::Value =
                    serde_json::from_slice(&raw).map_err(|e| CodecError::Encode(e.to_string()))?;
                if let Some(adapter) = &toolset.result_adapter {
                    match adapter.adapt(&request.name, json) {
                        Ok(adapted) => json = adapted,
                        Err(e) => {
                            let mut event = failure_event(
                                request,
                                tool_call_id,
                                format!("result adapter failed: {e}"),
                                None,
                            );
                            event.telemetry = telemetry;
                            event.children_count = children_count;
                            return Ok(event);
                        }
                    }
                }
                (Some(json), bounds)
            }
            None => (None, None),
        };

        if spec.bounded_result && bounds.is_none() {
            return Err(ToolError::MissingBounds(request.name.clone()));
        }

        let artifacts = match request.artifacts_mode {
            ArtifactsMode::Inline => artifacts,
            ArtifactsMode::Discard => Vec::new(),
        };

        Ok(ToolEvent {
            name: request.name.clone(),
            tool_call_id,
            result: result_json,
            error: None,
            retry_hint: None,
            artifacts,
            bounds,
            telemetry,
            children_count,
            run_link: None,
            result_omitted: false,
            omitted_reason: None,
        })
    }

    /// Derive bounds for a bounded tool from the typed result. Raw byte
    /// results are decoded through the result codec first.
    fn derive_bounds(
        &self,
        spec: &crate::spec::ToolSpec,
        value: &ToolValue,
    ) -> Result<Option<Bounds>, ToolError> {
        if !spec.bounded_result {
            return Ok(None);
        }
        match value {
            ToolValue::Typed(typed) => Ok(spec.result.derive_bounds(typed.as_ref())),
            ToolValue::Bytes(raw) => {
                let typed = self
                    .registry
                    .unmarshal_tool_value(&spec.name, raw, CodecKind::Result)
                    .map_err(ToolError::Codec)?;
                Ok(spec.result.derive_bounds(typed.as_ref()))
            }
        }
    }
}

fn failure_event(
    request: &ToolRequest,
    tool_call_id: ToolCallId,
    error: String,
    retry_hint: Option<axon_types::RetryHint>,
) -> ToolEvent {
    ToolEvent {
        name: request.name.clone(),
        tool_call_id,
        result: None,
        error: Some(error),
        retry_hint,
        artifacts: Vec::new(),
        bounds: None,
        telemetry: None,
        children_count: 0,
        run_link: None,
        result_omitted: false,
        omitted_reason: None,
    }
}
