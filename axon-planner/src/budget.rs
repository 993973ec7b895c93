//! The plan-activity input budget.
//!
//! Plan inputs cross an activity boundary and are persisted by durable
//! engines; unbounded tool results would blow workflow history limits.
//! Oversized results are dropped (with a documented reason) before the
//! input ships, and inputs that still exceed the hard cap are rejected.

use axon_types::{PlanError, PlanInput, ToolEvent};

/// Hard cap on the serialized plan input, in bytes.
pub const DEFAULT_MAX_PLAN_INPUT_BYTES: usize = 1 << 20;

/// Per-result cap applied while encoding tool events for planning.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 64 << 10;

/// Reject inputs whose serialized size exceeds `max_bytes`.
pub fn enforce_plan_input_budget(input: &PlanInput, max_bytes: usize) -> Result<(), PlanError> {
    let size = serde_json::to_vec(input).map(|b| b.len()).unwrap_or(0);
    if size > max_bytes {
        return Err(PlanError::InputBudget {
            size,
            max: max_bytes,
        });
    }
    Ok(())
}

/// Prepare tool events for a plan input: results and artifacts whose
/// serialized size exceeds `max_result_bytes` are omitted and the event
/// is marked `result_omitted` with the reason.
pub fn encode_tool_events_for_planning(
    events: &[ToolEvent],
    max_result_bytes: usize,
) -> Vec<ToolEvent> {
    events
        .iter()
        .map(|event| {
            let mut event = event.clone();
            let result_size = event
                .result
                .as_ref()
                .and_then(|r| serde_json::to_vec(r).ok())
                .map(|b| b.len())
                .unwrap_or(0);
            let artifact_size: usize = event
                .artifacts
                .iter()
                .filter_map(|a| serde_json::to_vec(&a.data).ok())
                .map(|b| b.len())
                .sum();
            if result_size + artifact_size > max_result_bytes {
                event.result = None;
                event.artifacts.clear();
                event.result_omitted = true;
                event.omitted_reason = Some(format!(
                    "result of {} bytes exceeds the planning budget of {} bytes",
                    result_size + artifact_size,
                    max_result_bytes
                ));
            }
            event
        })
        .collect()
}
