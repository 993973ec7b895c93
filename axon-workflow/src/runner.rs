//! The deterministic plan/resume loop.

use std::sync::Arc;

use tracing::{debug, warn};

use axon_hooks::{CompletionStatus, EventKind, RunEvent};
use axon_planner::{
    HistoryPolicy, Summarizer, encode_tool_events_for_planning, DEFAULT_MAX_RESULT_BYTES,
};
use axon_tool::ToolRegistry;
use axon_types::{
    FinalResponse, PlanError, PlanInput, PlanResult, PlanResumeInput, PlannerNote, RunContext,
    RunError, SignalError, TerminationReason, ToolEvent,
};

use crate::awaits::{AwaitCoordinator, ControlSignal, PauseRequest};
use crate::children::ChildTracker;
use crate::engine::{CONTROL_SIGNAL, SignalReceiver, WorkflowEngine};
use crate::input::{RunInput, RunOutput};
use crate::state::LoopState;
use crate::turn::TurnOutcome;

/// Drives one run to completion on a workflow engine.
///
/// The loop itself is deterministic: time comes from the engine clock,
/// waiting happens on engine signal channels and timers, and every side
/// effect is an activity. Replaying the same history reproduces the
/// same decisions and the same derived identifiers.
pub struct RunLoop {
    pub(crate) engine: Arc<dyn WorkflowEngine>,
    pub(crate) registry: Arc<ToolRegistry>,
    pub(crate) awaits: Arc<AwaitCoordinator>,
    pub(crate) runtime_policy: Option<Arc<dyn crate::policy::RuntimePolicy>>,
    history: HistoryPolicy,
    summarizer: Option<Arc<dyn Summarizer>>,
}

impl RunLoop {
    /// A loop over the given engine, registry, and await coordinator.
    pub fn new(
        engine: Arc<dyn WorkflowEngine>,
        registry: Arc<ToolRegistry>,
        awaits: Arc<AwaitCoordinator>,
    ) -> Self {
        Self {
            engine,
            registry,
            awaits,
            runtime_policy: None,
            history: HistoryPolicy::KeepAll,
            summarizer: None,
        }
    }

    /// Install a runtime policy consulted before each tool turn.
    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn crate::policy::RuntimePolicy>) -> Self {
        self.runtime_policy = Some(policy);
        self
    }

    /// Install a history compression policy.
    #[must_use]
    pub fn with_history(mut self, history: HistoryPolicy) -> Self {
        self.history = history;
        self
    }

    /// Install the summarizer backing `HistoryPolicy::Compress`.
    #[must_use]
    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Run to completion. Terminal failures publish a failed
    /// `RunCompleted` before returning the error.
    pub async fn run(&self, input: RunInput) -> Result<RunOutput, RunError> {
        self.awaits.open_run(input.run_id.clone());
        let result = self.drive(&input).await;
        self.awaits.close_run(&input.run_id);
        if let Err(error) = &result {
            let status = if matches!(error, RunError::Canceled) {
                CompletionStatus::Canceled
            } else {
                CompletionStatus::Failed
            };
            let state = LoopState::new(&input, self.engine.now());
            self.publish(
                &input,
                &state,
                EventKind::RunCompleted {
                    status,
                    error: Some(error.to_string()),
                    usage: None,
                },
            )
            .await;
        }
        result
    }

    async fn drive(&self, input: &RunInput) -> Result<RunOutput, RunError> {
        let started = self.engine.now();
        let mut state = LoopState::new(input, started);

        self.publish(
            input,
            &state,
            EventKind::RunStarted {
                labels: input.labels.clone(),
            },
        )
        .await;
        if let (Some(parent_run), Some(_)) =
            (input.run_id.parent(), input.parent_tool_call_id.as_ref())
        {
            let tool = input.agent.agent_id.to_string();
            self.publish(
                input,
                &state,
                EventKind::AgentRunStarted {
                    parent_run_id: parent_run,
                    tool,
                },
            )
            .await;
        }

        let mut tracker = input
            .parent_tool_call_id
            .clone()
            .map(|parent| ChildTracker::new(parent, input.expected_children));

        let mut result = self.plan_start(input, &mut state).await?;

        loop {
            self.drain_pauses(input, &mut state).await;
            if self.engine.cancellation().is_cancelled() {
                return Err(RunError::Canceled);
            }

            let pending = match result {
                PlanResult::FinalResponse(final_response) => {
                    return self.complete(input, &mut state, final_response).await;
                }
                pending => pending,
            };

            if state.termination.is_none() {
                if let Some(reason) = self.termination_due(&state) {
                    state.termination = Some(reason);
                    result = PlanResult::FinalResponse(
                        self.finalize(input, &mut state, reason).await?,
                    );
                    continue;
                }
            }

            match pending {
                PlanResult::FinalResponse(_) => unreachable!("handled above"),
                PlanResult::Await { queue } => {
                    state.next_turn();
                    result = self
                        .await_only_turn(input, &mut state, queue)
                        .await?;
                }
                PlanResult::ToolCalls {
                    calls,
                    await_queue,
                    expected_children,
                } => {
                    state.next_turn();
                    let outcome = self
                        .tool_turn(
                            input,
                            &mut state,
                            tracker.as_mut(),
                            calls,
                            await_queue,
                            expected_children,
                        )
                        .await?;
                    match outcome {
                        TurnOutcome::Terminal => {
                            return self.complete_terminal(input, &mut state).await;
                        }
                        TurnOutcome::Finalize(reason) => {
                            state.termination = Some(reason);
                            result = PlanResult::FinalResponse(
                                self.finalize(input, &mut state, reason).await?,
                            );
                        }
                        TurnOutcome::Resume {
                            tool_results,
                            reminders,
                        } => {
                            result = self
                                .plan_resume(input, &mut state, tool_results, reminders, None)
                                .await?;
                        }
                    }
                }
            }
        }
    }

    /// Emit the final assistant message and wrap up.
    async fn complete(
        &self,
        input: &RunInput,
        state: &mut LoopState,
        final_response: FinalResponse,
    ) -> Result<RunOutput, RunError> {
        let mut message = final_response.message;
        if message.is_empty() && final_response.streamed {
            message = state
                .streamed_text
                .take()
                .or_else(|| state.ledger.recover_final_text())
                .unwrap_or_default();
        }
        if !message.is_empty() {
            state.ledger.append_assistant_text(&message);
        }

        for note in &final_response.notes {
            self.publish(
                input,
                state,
                EventKind::PlannerNote {
                    code: note.code.clone(),
                    text: note.text.clone(),
                },
            )
            .await;
        }
        state.notes.extend(final_response.notes);

        self.publish(
            input,
            state,
            EventKind::AssistantMessage {
                text: message.clone(),
                streamed: final_response.streamed,
            },
        )
        .await;
        self.publish(input, state, EventKind::Usage { usage: state.usage })
            .await;
        self.publish(
            input,
            state,
            EventKind::RunCompleted {
                status: CompletionStatus::Success,
                error: None,
                usage: Some(state.usage),
            },
        )
        .await;

        Ok(RunOutput {
            run_id: input.run_id.clone(),
            final_message: message,
            notes: std::mem::take(&mut state.notes),
            usage: state.usage,
            tool_events: std::mem::take(&mut state.tool_events),
            termination: state.termination,
            status: CompletionStatus::Success,
        })
    }

    /// A terminal tool ends the run with no assistant follow-up and no
    /// further plan activity.
    pub(crate) async fn complete_terminal(
        &self,
        input: &RunInput,
        state: &mut LoopState,
    ) -> Result<RunOutput, RunError> {
        self.publish(input, state, EventKind::Usage { usage: state.usage })
            .await;
        self.publish(
            input,
            state,
            EventKind::RunCompleted {
                status: CompletionStatus::Success,
                error: None,
                usage: Some(state.usage),
            },
        )
        .await;
        Ok(RunOutput {
            run_id: input.run_id.clone(),
            final_message: String::new(),
            notes: std::mem::take(&mut state.notes),
            usage: state.usage,
            tool_events: std::mem::take(&mut state.tool_events),
            termination: state.termination,
            status: CompletionStatus::Success,
        })
    }

    /// Ask the planner to wrap up. A planner that keeps requesting work
    /// anyway gets an empty final response with a note.
    pub(crate) async fn finalize(
        &self,
        input: &RunInput,
        state: &mut LoopState,
        reason: TerminationReason,
    ) -> Result<FinalResponse, RunError> {
        self.publish(
            input,
            state,
            EventKind::RunPhaseChanged {
                phase: "finalizing".into(),
            },
        )
        .await;
        let finalize_reason = match reason {
            TerminationReason::TimeBudget => TerminationReason::TimeBudget,
            TerminationReason::ToolCap => TerminationReason::ToolCap,
            TerminationReason::FailureCap => TerminationReason::FailureCap,
            // Await-shaped timeouts all finalize as await_timeout; the
            // specific reason already went out on RunResumed.
            _ => TerminationReason::AwaitTimeout,
        };
        let result = self
            .plan_resume(input, state, Vec::new(), Vec::new(), Some(finalize_reason))
            .await?;
        match result {
            PlanResult::FinalResponse(final_response) => Ok(final_response),
            _ => {
                warn!(run = %input.run_id, "planner ignored finalize, synthesizing final response");
                Ok(FinalResponse {
                    message: state.ledger.recover_final_text().unwrap_or_default(),
                    notes: vec![PlannerNote::coded(
                        "finalize_ignored",
                        format!("planner did not finalize on {}", finalize_reason.as_str()),
                    )],
                    streamed: false,
                })
            }
        }
    }

    fn termination_due(&self, state: &LoopState) -> Option<TerminationReason> {
        if state.caps.tool_calls_exhausted() {
            return Some(TerminationReason::ToolCap);
        }
        if state.caps.failures_exhausted() {
            return Some(TerminationReason::FailureCap);
        }
        if state.soft_deadline_passed(self.engine.now()) {
            return Some(TerminationReason::TimeBudget);
        }
        None
    }

    pub(crate) async fn plan_start(
        &self,
        input: &RunInput,
        state: &mut LoopState,
    ) -> Result<PlanResult, RunError> {
        self.publish(
            input,
            state,
            EventKind::RunPhaseChanged {
                phase: "planning".into(),
            },
        )
        .await;
        let plan_input = self.plan_input(input, state, Vec::new()).await?;
        state.attempt += 1;
        let output = self.engine.execute_plan_start(plan_input).await?;
        output.result.validate().map_err(PlanError::Shape)?;
        state.usage.accumulate(&output.usage);
        state.streamed_text = output.streamed_text;
        Ok(output.result)
    }

    pub(crate) async fn plan_resume(
        &self,
        input: &RunInput,
        state: &mut LoopState,
        tool_results: Vec<ToolEvent>,
        reminders: Vec<axon_types::Message>,
        finalize: Option<TerminationReason>,
    ) -> Result<PlanResult, RunError> {
        self.publish(
            input,
            state,
            EventKind::RunPhaseChanged {
                phase: "planning".into(),
            },
        )
        .await;
        let mut base = self.plan_input(input, state, reminders).await?;
        base.events = encode_tool_events_for_planning(&state.tool_events, DEFAULT_MAX_RESULT_BYTES);
        state.attempt += 1;
        let resume = PlanResumeInput {
            base,
            tool_results: encode_tool_events_for_planning(&tool_results, DEFAULT_MAX_RESULT_BYTES),
            finalize,
        };
        let output = self.engine.execute_plan_resume(resume).await?;
        output.result.validate().map_err(PlanError::Shape)?;
        state.usage.accumulate(&output.usage);
        state.streamed_text = output.streamed_text;
        Ok(output.result)
    }

    async fn plan_input(
        &self,
        input: &RunInput,
        state: &LoopState,
        reminders: Vec<axon_types::Message>,
    ) -> Result<PlanInput, RunError> {
        let messages = self
            .history
            .apply(
                state.ledger.messages().to_vec(),
                self.summarizer.as_deref(),
            )
            .await
            .map_err(RunError::Plan)?;
        Ok(PlanInput {
            messages,
            context: RunContext {
                run_id: input.run_id.clone(),
                agent_id: input.agent.agent_id.clone(),
                session_id: input.session_id.clone(),
                turn_id: state.turn.clone(),
                attempt: state.attempt,
            },
            agent: input.agent.clone(),
            events: Vec::new(),
            reminders,
        })
    }

    /// Consume queued pause requests at a checkpoint.
    pub(crate) async fn drain_pauses(&self, input: &RunInput, state: &mut LoopState) {
        let control = self
            .engine
            .signal_channel(&input.run_id, CONTROL_SIGNAL);
        while let Ok(Some(value)) = control.try_receive() {
            match serde_json::from_value::<ControlSignal>(value) {
                Ok(ControlSignal::Pause(request)) => {
                    self.handle_pause(input, state, &control, request).await;
                }
                Ok(_) => {
                    debug!(run = %input.run_id, "ignoring stale control signal at checkpoint");
                }
                Err(e) => warn!(run = %input.run_id, error = %e, "malformed control signal"),
            }
        }
    }

    /// Pause until a resume arrives (or the deadline passes). Publishes
    /// the balanced `RunPaused`/`RunResumed` pair and shifts the
    /// deadline by the consumed pause.
    pub(crate) async fn handle_pause(
        &self,
        input: &RunInput,
        state: &mut LoopState,
        control: &Arc<dyn SignalReceiver>,
        request: PauseRequest,
    ) {
        self.publish(
            input,
            state,
            EventKind::RunPaused {
                reason: request.reason.clone(),
                requested_by: request.requested_by.clone(),
                labels: request.labels.clone(),
                metadata: request.metadata.clone(),
            },
        )
        .await;
        let paused_at = self.engine.now();

        let resume_reason = loop {
            let timeout = state.remaining_await(self.engine.now());
            match control.receive(timeout).await {
                Ok(value) => match serde_json::from_value::<ControlSignal>(value) {
                    Ok(ControlSignal::Resume(resume)) => {
                        break resume.reason.unwrap_or_else(|| "resume_request".into());
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(run = %input.run_id, error = %e, "malformed control signal");
                        continue;
                    }
                },
                Err(SignalError::DeadlineExceeded) | Err(SignalError::Closed) => {
                    break "resume_timeout".into();
                }
            }
        };

        let paused_for = self.engine.now() - paused_at;
        state.credit_pause(paused_for);
        self.publish(
            input,
            state,
            EventKind::RunResumed {
                reason: resume_reason,
            },
        )
        .await;
    }

    /// Publish a workflow-originated event through the engine. Failures
    /// are logged, never fatal to the run.
    pub(crate) async fn publish(&self, input: &RunInput, state: &LoopState, kind: EventKind) {
        let event = RunEvent::new(state.meta(input), kind);
        if let Err(e) = self.engine.publish_hook(event).await {
            warn!(run = %input.run_id, error = %e, "hook publish failed");
        }
    }
}
