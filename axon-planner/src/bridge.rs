//! The planner bridge: traced invocation with rate-limit surfacing.

use std::sync::Arc;

use tracing::{Instrument, info_span};

use axon_types::{PlanError, PlanInput, PlanResult, PlanResumeInput};

use crate::budget::{DEFAULT_MAX_PLAN_INPUT_BYTES, enforce_plan_input_budget};
use crate::planner::Planner;
use crate::sink::PlannerEventSink;

/// Wraps planner invocations with a traced span, the input budget, and
/// result-shape validation.
///
/// Rate-limit errors are surfaced twice: a `PlannerNote` with
/// `code=rate_limited` goes to the hook bus for operators, and the
/// original error returns to the engine so its retry policy can apply
/// exponential backoff.
pub struct PlannerBridge {
    planner: Arc<dyn Planner>,
    max_input_bytes: usize,
}

impl PlannerBridge {
    /// A bridge over the given planner with the default input budget.
    pub fn new(planner: Arc<dyn Planner>) -> Self {
        Self {
            planner,
            max_input_bytes: DEFAULT_MAX_PLAN_INPUT_BYTES,
        }
    }

    /// Override the plan-activity input budget.
    #[must_use]
    pub fn with_input_budget(mut self, max_bytes: usize) -> Self {
        self.max_input_bytes = max_bytes;
        self
    }

    /// Invoke `plan_start` inside a traced span.
    pub async fn plan_start(
        &self,
        input: PlanInput,
        sink: &PlannerEventSink,
    ) -> Result<PlanResult, PlanError> {
        enforce_plan_input_budget(&input, self.max_input_bytes)?;
        let span = info_span!(
            "plan_start",
            run_id = %input.context.run_id,
            attempt = input.context.attempt,
        );
        let result = self.planner.plan_start(input).instrument(span).await;
        self.finish(result, sink).await
    }

    /// Invoke `plan_resume` inside a traced span.
    pub async fn plan_resume(
        &self,
        input: PlanResumeInput,
        sink: &PlannerEventSink,
    ) -> Result<PlanResult, PlanError> {
        enforce_plan_input_budget(&input.base, self.max_input_bytes)?;
        let span = info_span!(
            "plan_resume",
            run_id = %input.base.context.run_id,
            attempt = input.base.context.attempt,
            finalize = input.finalize.is_some(),
        );
        let result = self.planner.plan_resume(input).instrument(span).await;
        self.finish(result, sink).await
    }

    async fn finish(
        &self,
        result: Result<PlanResult, PlanError>,
        sink: &PlannerEventSink,
    ) -> Result<PlanResult, PlanError> {
        match result {
            Ok(plan) => {
                plan.validate()?;
                Ok(plan)
            }
            Err(error) => {
                if matches!(error, PlanError::RateLimited { .. }) {
                    sink.note(Some("rate_limited"), &error.to_string()).await;
                }
                Err(error)
            }
        }
    }
}
