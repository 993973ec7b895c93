//! Tool turns and the await controller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::warn;

use axon_hooks::EventKind;
use axon_tool::{CodecKind, ConfirmationSpec, ToolSpec};
use axon_types::{
    AwaitError, AwaitId, AwaitItem, AwaitResolution, ExternalToolCall, Message, PlanResult,
    RetryReason, Role, RunError, SignalError, TerminationReason, ToolCallId, ToolEvent,
    ToolRequest,
};

use crate::awaits::{ControlSignal, PendingAwait, PendingKind};
use crate::children::ChildTracker;
use crate::engine::{ActivityOptions, CONTROL_SIGNAL, SignalReceiver};
use crate::input::RunInput;
use crate::policy::{MissingFieldsPolicy, PolicyInput};
use crate::reminders::{bounds_reminder, retry_hint_reminder};
use crate::runner::RunLoop;
use crate::state::LoopState;

/// How a tool turn ended.
pub(crate) enum TurnOutcome {
    /// A terminal tool executed; return with no assistant follow-up.
    Terminal,
    /// Stop planning work and ask the planner to wrap up.
    Finalize(TerminationReason),
    /// Continue with the next plan resume.
    Resume {
        /// Tool events to hand to the planner.
        tool_results: Vec<ToolEvent>,
        /// Reminder messages rendered this turn.
        reminders: Vec<Message>,
    },
}

/// A confirmation split out of the batch, waiting in the await queue.
struct PendingConfirmation {
    call: ToolRequest,
    await_id: AwaitId,
    title: String,
    prompt: String,
    denied_result: serde_json::Value,
    terminal: bool,
    is_agent_tool: bool,
}

/// One entry of the unified await queue, in wait order.
struct QueueEntry {
    await_id: AwaitId,
    pending: PendingKind,
    announce: EventKind,
    timeout_reason: &'static str,
    payload: EntryPayload,
}

enum EntryPayload {
    Clarification,
    Questions,
    External { calls: Vec<ExternalToolCall> },
    Confirmation(PendingConfirmation),
}

/// What the await controller produced.
enum AwaitOutcome {
    Resolved {
        extra_events: Vec<ToolEvent>,
        terminal: bool,
    },
    TimedOut,
}

impl RunLoop {
    /// One tool turn: policy, caps, confirmations, dispatch, reminders,
    /// protection checks, and the chained await queue.
    pub(crate) async fn tool_turn(
        &self,
        input: &RunInput,
        state: &mut LoopState,
        tracker: Option<&mut ChildTracker>,
        calls: Vec<ToolRequest>,
        await_queue: Vec<AwaitItem>,
        _expected_children: u32,
    ) -> Result<TurnOutcome, RunError> {
        self.publish(
            input,
            state,
            EventKind::RunPhaseChanged {
                phase: "executing".into(),
            },
        )
        .await;

        // Per-run overrides, then unknown-name rewriting, then tag
        // filters that need the resolved spec.
        let mut resolved: Vec<(ToolRequest, Arc<ToolSpec>)> = Vec::with_capacity(calls.len());
        for mut call in calls {
            if let Some(only) = &input.policy.restrict_to_tool {
                if &call.name != only {
                    continue;
                }
            }
            let name = self
                .registry
                .resolve_name(&call.name)
                .ok_or_else(|| RunError::Tool(axon_types::ToolError::UnknownTool(call.name.clone())))?;
            call.name = name;
            let spec = self
                .registry
                .tool_spec(&call.name)
                .ok_or_else(|| RunError::Tool(axon_types::ToolError::UnknownTool(call.name.clone())))?;
            if !input.policy.allows(&call.name, &spec.tags) {
                continue;
            }
            resolved.push((call, spec));
        }
        if resolved.is_empty() {
            return Err(RunError::NoToolsAllowed);
        }

        // Runtime policy decision.
        if let Some(policy) = &self.runtime_policy {
            let decision = policy
                .decide(PolicyInput {
                    run_id: input.run_id.clone(),
                    agent_id: input.agent.agent_id.clone(),
                    turn_id: state.turn.clone().unwrap_or_else(|| "turn-0".into()),
                    attempt: state.attempt,
                    candidate_tools: resolved.iter().map(|(c, _)| c.name.clone()).collect(),
                    caps: state.caps.clone(),
                })
                .await?;
            if let Some(patch) = &decision.caps {
                state.caps.merge(patch);
            }
            self.publish(
                input,
                state,
                EventKind::PolicyDecision {
                    allowed_tools: decision.allowed_tools.clone(),
                    disable_tools: decision.disable_tools,
                    labels: decision.labels.clone(),
                    metadata: decision.metadata.clone(),
                },
            )
            .await;
            if decision.disable_tools {
                return Err(RunError::ToolsDisabled);
            }
            if let Some(allowed) = decision.allowed_tools {
                resolved.retain(|(call, _)| allowed.contains(&call.name));
                if resolved.is_empty() {
                    return Err(RunError::NoToolsAllowed);
                }
            }
        }

        // Cap the batch.
        let mut budget = state.caps.allow(resolved.len());
        if let Some(per_turn) = input.policy.per_turn_max_tool_calls {
            budget = budget.min(per_turn);
        }
        resolved.truncate(budget);
        if resolved.is_empty() {
            return Ok(TurnOutcome::Finalize(TerminationReason::ToolCap));
        }

        // Stamp metadata and deterministic call IDs.
        let turn = state.turn.clone();
        for (index, (call, _)) in resolved.iter_mut().enumerate() {
            call.run_id = input.run_id.clone();
            call.agent_id = input.agent.agent_id.clone();
            call.session_id = input.session_id.clone();
            call.turn_id = turn.clone();
            call.artifacts_mode = input.artifacts_mode;
            if call.tool_call_id.is_none() {
                call.tool_call_id = Some(ToolCallId::derive(
                    &input.run_id,
                    turn.as_ref(),
                    &call.name,
                    index,
                ));
            }
        }

        // Parent tracking for nested runs: one ToolCallUpdated with the
        // new expected total.
        if let Some(tracker) = tracker {
            let ids: Vec<ToolCallId> = resolved
                .iter()
                .filter_map(|(call, _)| call.tool_call_id.clone())
                .collect();
            if let Some(total) = tracker.register(&ids) {
                self.publish(
                    input,
                    state,
                    EventKind::ToolCallUpdated {
                        tool_call_id: tracker.parent_call().clone(),
                        expected_children: total,
                    },
                )
                .await;
            }
            for (call, _) in &mut resolved {
                call.parent_tool_call_id = Some(tracker.parent_call().clone());
            }
        }

        // Split confirmations into the await queue.
        let mut execute_now: Vec<(ToolRequest, Arc<ToolSpec>)> = Vec::new();
        let mut confirmations: Vec<PendingConfirmation> = Vec::new();
        for (call, spec) in resolved {
            let gate = spec.confirmation.clone().or_else(|| {
                input
                    .policy
                    .forces_confirmation(&call.name)
                    .then(|| default_confirmation(&call.name))
            });
            match gate {
                Some(gate) => {
                    let await_id = AwaitId::derive(
                        &input.run_id,
                        turn.as_ref(),
                        call.tool_call_id.as_ref(),
                    );
                    confirmations.push(PendingConfirmation {
                        title: gate.title.clone(),
                        prompt: gate.render_prompt(&call.payload),
                        denied_result: gate.denied_result(&call.payload),
                        terminal: spec.terminal_run,
                        is_agent_tool: spec.is_agent_tool,
                        call,
                        await_id,
                    });
                }
                None => execute_now.push((call, spec)),
            }
        }

        // Record assistant tool_use for the subset executing now, so the
        // provider sees correct correlation even while confirmations are
        // pending.
        let uses: Vec<(String, String, serde_json::Value)> = execute_now
            .iter()
            .filter_map(|(call, _)| {
                call.tool_call_id
                    .as_ref()
                    .map(|id| (id.to_string(), call.name.clone(), call.payload.clone()))
            })
            .collect();
        state.ledger.append_tool_uses(&uses);

        // Early finalize when a tool's deadline would land inside the
        // finalize-reserve window.
        let longest_timeout = execute_now
            .iter()
            .filter_map(|(_, spec)| spec.timeout)
            .max();
        if let Some(timeout) = longest_timeout {
            let projected = self.engine.now()
                + chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::zero());
            if state.soft_deadline_passed(projected) {
                return Ok(TurnOutcome::Finalize(TerminationReason::TimeBudget));
            }
        }

        let prior_inputs: HashMap<ToolCallId, serde_json::Value> = execute_now
            .iter()
            .filter_map(|(call, _)| {
                call.tool_call_id
                    .as_ref()
                    .map(|id| (id.clone(), call.payload.clone()))
            })
            .collect();

        let batch_has_terminal = execute_now.iter().any(|(_, spec)| spec.terminal_run);

        let mut events = self.dispatch_batch(input, state, execute_now).await?;

        // Decode results into the ledger, with reminders.
        let mut reminders: Vec<Message> = Vec::new();
        let mut entries: Vec<(String, serde_json::Value, bool)> = Vec::new();
        for event in &events {
            let content = event
                .result
                .clone()
                .unwrap_or_else(|| json!({ "error": event.error }));
            entries.push((event.tool_call_id.to_string(), content, event.is_failure()));
            if let Some(hint) = &event.retry_hint {
                let prior = prior_inputs.get(&event.tool_call_id);
                reminders.push(Message::text(
                    Role::System,
                    retry_hint_reminder(hint, prior),
                ));
            }
            if let Some(bounds) = &event.bounds {
                reminders.push(Message::text(
                    Role::System,
                    bounds_reminder(&event.name, bounds),
                ));
            }
        }
        state.ledger.append_tool_results(&entries);
        for reminder in &reminders {
            state.ledger.append(reminder.clone());
        }

        // Charge caps.
        let executed = events.len() as u32;
        let failures = events.iter().filter(|e| e.is_failure()).count() as u32;
        state.caps.charge_tools(executed);
        state.caps.observe_turn_failures(failures);
        state.tool_events.extend(events.iter().cloned());

        // Hard protection: once nested agents ran, a batch failing past
        // the threshold ends the run.
        if state.executed_agent_tool && failures > 0 {
            if let Some(threshold) = input.policy.hard_protection_threshold {
                if failures >= threshold {
                    self.publish(
                        input,
                        state,
                        EventKind::HardProtectionTriggered {
                            failed_calls: failures,
                            threshold,
                        },
                    )
                    .await;
                    return Ok(TurnOutcome::Finalize(TerminationReason::FailureCap));
                }
            }
        }

        // Terminal tool short-circuit.
        if batch_has_terminal {
            return Ok(TurnOutcome::Terminal);
        }

        // Chain into await handling when the planner asked for it or
        // confirmations are pending.
        if !await_queue.is_empty() || !confirmations.is_empty() {
            match self
                .process_await_queue(input, state, await_queue, confirmations)
                .await?
            {
                AwaitOutcome::TimedOut => {
                    return Ok(TurnOutcome::Finalize(TerminationReason::AwaitTimeout));
                }
                AwaitOutcome::Resolved {
                    extra_events,
                    terminal,
                } => {
                    events.extend(extra_events);
                    if terminal {
                        return Ok(TurnOutcome::Terminal);
                    }
                }
            }
        }

        // Missing-fields policy.
        let missing_fields = events.iter().any(|e| {
            e.retry_hint
                .as_ref()
                .is_some_and(|h| h.reason == RetryReason::MissingFields)
        });
        if missing_fields {
            match input.policy.on_missing_fields {
                MissingFieldsPolicy::Resume => {}
                MissingFieldsPolicy::Finalize => {
                    return Ok(TurnOutcome::Finalize(TerminationReason::FailureCap));
                }
                MissingFieldsPolicy::AwaitClarification => {
                    let prompt = events
                        .iter()
                        .filter_map(|e| e.retry_hint.as_ref())
                        .filter_map(|h| h.clarifying_question.clone())
                        .next()
                        .unwrap_or_else(|| "Please provide the missing fields.".to_owned());
                    let queue = vec![AwaitItem::Clarification {
                        prompt,
                        tool_call_id: events
                            .iter()
                            .find(|e| e.retry_hint.is_some())
                            .map(|e| e.tool_call_id.clone()),
                    }];
                    match self
                        .process_await_queue(input, state, queue, Vec::new())
                        .await?
                    {
                        AwaitOutcome::TimedOut => {
                            return Ok(TurnOutcome::Finalize(
                                TerminationReason::ClarificationTimeout,
                            ));
                        }
                        AwaitOutcome::Resolved { .. } => {}
                    }
                }
            }
        }

        Ok(TurnOutcome::Resume {
            tool_results: events,
            reminders,
        })
    }

    /// An await-only plan result: block, then resume once with
    /// everything the operator provided.
    pub(crate) async fn await_only_turn(
        &self,
        input: &RunInput,
        state: &mut LoopState,
        queue: Vec<AwaitItem>,
    ) -> Result<PlanResult, RunError> {
        match self
            .process_await_queue(input, state, queue, Vec::new())
            .await?
        {
            AwaitOutcome::TimedOut => {
                state.termination = Some(TerminationReason::AwaitTimeout);
                let final_response = self
                    .finalize(input, state, TerminationReason::AwaitTimeout)
                    .await?;
                Ok(PlanResult::FinalResponse(final_response))
            }
            AwaitOutcome::Resolved { extra_events, .. } => {
                self.plan_resume(input, state, extra_events, Vec::new(), None)
                    .await
            }
        }
    }

    /// Dispatch a batch: agent tools inline (so child workflows can
    /// start), everything else grouped by timeout through the activity
    /// scheduler. Results come back in request order.
    async fn dispatch_batch(
        &self,
        input: &RunInput,
        state: &mut LoopState,
        batch: Vec<(ToolRequest, Arc<ToolSpec>)>,
    ) -> Result<Vec<ToolEvent>, RunError> {
        let mut slots: Vec<Option<ToolEvent>> = (0..batch.len()).map(|_| None).collect();
        let mut groups: HashMap<Option<Duration>, Vec<(usize, ToolRequest)>> = HashMap::new();

        for (index, (call, spec)) in batch.into_iter().enumerate() {
            self.publish(
                input,
                state,
                EventKind::ToolCallScheduled {
                    tool_call_id: call
                        .tool_call_id
                        .clone()
                        .unwrap_or_else(|| ToolCallId::new("")),
                    tool: call.name.clone(),
                    payload: call.payload.clone(),
                    parent_tool_call_id: call.parent_tool_call_id.clone(),
                },
            )
            .await;
            if spec.is_agent_tool {
                let event = self
                    .run_agent_tool(input, state, &call, spec.as_ref())
                    .await;
                slots[index] = Some(event);
            } else {
                groups.entry(spec.timeout).or_default().push((index, call));
            }
        }

        // Deterministic group order: shortest timeout first, untimed last.
        let mut ordered: Vec<(Option<Duration>, Vec<(usize, ToolRequest)>)> =
            groups.into_iter().collect();
        ordered.sort_by_key(|(timeout, _)| (timeout.is_none(), *timeout));

        for (timeout, group) in ordered {
            let options = ActivityOptions {
                queue: None,
                timeout,
                retry_policy: None,
            };
            let indices: Vec<usize> = group.iter().map(|(i, _)| *i).collect();
            let requests: Vec<(ToolRequest, ActivityOptions)> = group
                .into_iter()
                .map(|(_, call)| (call, options.clone()))
                .collect();
            let names: Vec<String> = requests.iter().map(|(r, _)| r.name.clone()).collect();
            let ids: Vec<Option<ToolCallId>> = requests
                .iter()
                .map(|(r, _)| r.tool_call_id.clone())
                .collect();

            let results = self.engine.execute_tool_batch(requests).await;
            for ((slot, result), (name, id)) in indices
                .into_iter()
                .zip(results)
                .zip(names.into_iter().zip(ids))
            {
                let event = match result {
                    Ok(event) => event,
                    // Activity failures count as turn-level tool
                    // failures; the caps decide the run's fate.
                    Err(error) => ToolEvent {
                        name,
                        tool_call_id: id.unwrap_or_else(|| ToolCallId::new("")),
                        result: None,
                        error: Some(error.to_string()),
                        retry_hint: None,
                        artifacts: Vec::new(),
                        bounds: None,
                        telemetry: None,
                        children_count: 0,
                        run_link: None,
                        result_omitted: false,
                        omitted_reason: None,
                    },
                };
                slots[slot] = Some(event);
            }
        }

        let events: Vec<ToolEvent> = slots.into_iter().flatten().collect();
        for event in &events {
            self.publish_result(input, state, event).await;
        }
        Ok(events)
    }

    /// Execute an agent-as-tool call inline: start the nested run as a
    /// child workflow and aggregate its outcome into one event.
    async fn run_agent_tool(
        &self,
        input: &RunInput,
        state: &mut LoopState,
        call: &ToolRequest,
        spec: &ToolSpec,
    ) -> ToolEvent {
        let call_id = call
            .tool_call_id
            .clone()
            .unwrap_or_else(|| ToolCallId::new(""));
        let suppress = self
            .registry
            .toolset(&spec.toolset)
            .is_some_and(|ts| ts.suppress_child_events);
        if suppress {
            self.engine.set_child_suppression(call_id.clone(), true);
        }

        let child_message = call
            .payload
            .get("input")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .unwrap_or_else(|| call.payload.to_string());
        let child_input = RunInput {
            run_id: input.run_id.nested(&call.name),
            agent: axon_types::AgentSpec {
                agent_id: axon_types::AgentId::new(call.name.clone()),
                ..Default::default()
            },
            session_id: input.session_id.clone(),
            messages: vec![Message::text(Role::User, child_message)],
            caps: axon_types::CapsState::unlimited(),
            policy: crate::policy::RunPolicy::default(),
            labels: input.labels.clone(),
            metadata: input.metadata.clone(),
            time_budget: None,
            artifacts_mode: input.artifacts_mode,
            parent_tool_call_id: Some(call_id.clone()),
            expected_children: 0,
        };
        let child_run_id = child_input.run_id.clone();

        let result = self.engine.start_child_run(child_input).await;
        if suppress {
            self.engine.set_child_suppression(call_id.clone(), false);
        }
        state.executed_agent_tool = true;

        match result {
            Ok(output) => {
                // Child telemetry aggregates into the parent call.
                state.usage.accumulate(&output.usage);
                ToolEvent {
                    name: call.name.clone(),
                    tool_call_id: call_id,
                    result: Some(json!({ "response": output.final_message })),
                    error: None,
                    retry_hint: None,
                    artifacts: Vec::new(),
                    bounds: None,
                    telemetry: Some(axon_types::ToolTelemetry {
                        duration_ms: 0,
                        model: None,
                        tokens_used: Some(output.usage.total()),
                    }),
                    children_count: output.tool_events.len() as u32,
                    run_link: Some(child_run_id),
                    result_omitted: false,
                    omitted_reason: None,
                }
            }
            Err(error) => ToolEvent {
                name: call.name.clone(),
                tool_call_id: call_id,
                result: None,
                error: Some(error.to_string()),
                retry_hint: None,
                artifacts: Vec::new(),
                bounds: None,
                telemetry: None,
                children_count: 0,
                run_link: Some(child_run_id),
                result_omitted: false,
                omitted_reason: None,
            },
        }
    }

    async fn publish_result(&self, input: &RunInput, state: &LoopState, event: &ToolEvent) {
        self.publish(
            input,
            state,
            EventKind::ToolResultReceived {
                tool_call_id: event.tool_call_id.clone(),
                tool: event.name.clone(),
                result: event.result.clone(),
                error: event.error.clone(),
                bounds: event.bounds.clone(),
                telemetry: event.telemetry.clone(),
                parent_tool_call_id: input.parent_tool_call_id.clone(),
            },
        )
        .await;
        if let Some(hint) = &event.retry_hint {
            self.publish(
                input,
                state,
                EventKind::RetryHintIssued {
                    tool_call_id: event.tool_call_id.clone(),
                    hint: hint.clone(),
                },
            )
            .await;
        }
    }

    /// Publish every await event up front, pause once, then satisfy the
    /// queue in declaration order. One balanced resume follows the last
    /// item; timeouts resume with the item-specific reason and finalize.
    async fn process_await_queue(
        &self,
        input: &RunInput,
        state: &mut LoopState,
        queue: Vec<AwaitItem>,
        confirmations: Vec<PendingConfirmation>,
    ) -> Result<AwaitOutcome, RunError> {
        let turn = state.turn.clone();
        let mut entries: Vec<QueueEntry> = Vec::new();

        for item in queue {
            match item {
                AwaitItem::Clarification {
                    prompt,
                    tool_call_id,
                } => {
                    let await_id =
                        AwaitId::derive(&input.run_id, turn.as_ref(), tool_call_id.as_ref());
                    entries.push(QueueEntry {
                        announce: EventKind::AwaitClarification {
                            await_id: await_id.clone(),
                            prompt,
                            tool_call_id,
                        },
                        pending: PendingKind::Clarification,
                        timeout_reason: "clarification_timeout",
                        payload: EntryPayload::Clarification,
                        await_id,
                    });
                }
                AwaitItem::Questions { questions } => {
                    let await_id = AwaitId::derive(&input.run_id, turn.as_ref(), None);
                    entries.push(QueueEntry {
                        announce: EventKind::AwaitQuestions {
                            await_id: await_id.clone(),
                            questions: questions.clone(),
                        },
                        pending: PendingKind::Questions {
                            ids: questions.iter().map(|q| q.id.clone()).collect(),
                        },
                        timeout_reason: "await_timeout",
                        payload: EntryPayload::Questions,
                        await_id,
                    });
                }
                AwaitItem::ExternalTools { calls } => {
                    // Contract checks are fatal to the run: every item
                    // needs a call ID and a registered spec.
                    for call in &calls {
                        if call.tool_call_id.as_str().is_empty() {
                            return Err(RunError::Await(AwaitError::MissingToolCallId(
                                call.name.clone(),
                            )));
                        }
                        if self.registry.tool_spec(&call.name).is_none() {
                            return Err(RunError::Await(AwaitError::MissingSpec(
                                call.name.clone(),
                            )));
                        }
                    }
                    let await_id = AwaitId::derive(
                        &input.run_id,
                        turn.as_ref(),
                        calls.first().map(|c| &c.tool_call_id),
                    );
                    entries.push(QueueEntry {
                        announce: EventKind::AwaitExternalTools {
                            await_id: await_id.clone(),
                            calls: calls.clone(),
                        },
                        pending: PendingKind::ExternalTools {
                            calls: calls.iter().map(|c| c.tool_call_id.clone()).collect(),
                        },
                        timeout_reason: "await_timeout",
                        payload: EntryPayload::External { calls },
                        await_id,
                    });
                }
            }
        }
        for confirmation in confirmations {
            let tool_call_id = confirmation
                .call
                .tool_call_id
                .clone()
                .unwrap_or_else(|| ToolCallId::new(""));
            entries.push(QueueEntry {
                announce: EventKind::AwaitConfirmation {
                    await_id: confirmation.await_id.clone(),
                    tool_call_id: tool_call_id.clone(),
                    title: confirmation.title.clone(),
                    prompt: confirmation.prompt.clone(),
                },
                pending: PendingKind::Confirmation { tool_call_id },
                timeout_reason: "confirmation_timeout",
                await_id: confirmation.await_id.clone(),
                payload: EntryPayload::Confirmation(confirmation),
            });
        }

        // Register the whole queue before announcing it, so an operator
        // reacting to the first event always finds the barrier open.
        let pendings: Vec<PendingAwait> = entries
            .iter()
            .map(|entry| PendingAwait {
                await_id: entry.await_id.clone(),
                kind: entry.pending.clone(),
            })
            .collect();
        self.awaits.begin_queue(&input.run_id, pendings);

        // Everything is announced before the pause, so operators can
        // build a wizard over the full queue.
        self.publish(
            input,
            state,
            EventKind::RunPhaseChanged {
                phase: "awaiting".into(),
            },
        )
        .await;
        for entry in &entries {
            self.publish(input, state, entry.announce.clone()).await;
        }
        self.publish(
            input,
            state,
            EventKind::RunPaused {
                reason: "await_queue".into(),
                requested_by: None,
                labels: Default::default(),
                metadata: Default::default(),
            },
        )
        .await;

        let control = self.engine.signal_channel(&input.run_id, CONTROL_SIGNAL);
        let mut resolutions: Vec<(EntryPayload, AwaitResolution)> = Vec::new();

        for entry in entries {
            let received = self
                .wait_for_resolution(input, state, &control, &entry.await_id)
                .await;

            match received {
                Ok(resolution) => {
                    if let AwaitResolution::Confirmation {
                        approved,
                        requested_by,
                        ..
                    } = &resolution
                    {
                        if let EntryPayload::Confirmation(confirmation) = &entry.payload {
                            let tool_call_id = confirmation
                                .call
                                .tool_call_id
                                .clone()
                                .unwrap_or_else(|| ToolCallId::new(""));
                            self.publish(
                                input,
                                state,
                                EventKind::ToolAuthorization {
                                    tool_call_id,
                                    approved: *approved,
                                    requested_by: requested_by.clone(),
                                },
                            )
                            .await;
                        }
                    }
                    self.awaits.advance(&input.run_id);
                    resolutions.push((entry.payload, resolution));
                }
                Err(WaitFailure::Timeout) => {
                    self.awaits.end_queue(&input.run_id);
                    self.publish(
                        input,
                        state,
                        EventKind::RunResumed {
                            reason: entry.timeout_reason.into(),
                        },
                    )
                    .await;
                    return Ok(AwaitOutcome::TimedOut);
                }
                Err(WaitFailure::Fatal(error)) => {
                    self.awaits.end_queue(&input.run_id);
                    return Err(error);
                }
            }
        }

        self.publish(
            input,
            state,
            EventKind::RunResumed {
                reason: "await_satisfied".into(),
            },
        )
        .await;

        self.apply_resolutions(input, state, resolutions).await
    }

    /// Fold the collected resolutions into the ledger and tool events,
    /// executing approved confirmations and synthesizing denied ones.
    async fn apply_resolutions(
        &self,
        input: &RunInput,
        state: &mut LoopState,
        resolutions: Vec<(EntryPayload, AwaitResolution)>,
    ) -> Result<AwaitOutcome, RunError> {
        let mut extra_events: Vec<ToolEvent> = Vec::new();
        let mut terminal = false;

        for (payload, resolution) in resolutions {
            match (payload, resolution) {
                (EntryPayload::Clarification, AwaitResolution::Clarification { answer, .. }) => {
                    state.append_user_text(format!("Clarification: {answer}"));
                }
                (EntryPayload::Questions, AwaitResolution::Answers { answers, .. }) => {
                    let text = answers
                        .iter()
                        .map(|(id, answer)| format!("{id}: {answer}"))
                        .collect::<Vec<_>>()
                        .join("\n");
                    state.append_user_text(format!("Answers:\n{text}"));
                }
                (
                    EntryPayload::External { calls },
                    AwaitResolution::ToolResults { results, .. },
                ) => {
                    // The codec validates the provided JSON's shape.
                    for result in &results {
                        let raw = serde_json::to_vec(&result.result)
                            .map_err(|e| RunError::Internal(e.to_string()))?;
                        self.registry
                            .unmarshal_tool_value(&result.name, &raw, CodecKind::Result)
                            .map_err(|err| match err {
                                axon_types::CodecError::MissingCodec(_) => RunError::Await(
                                    AwaitError::MissingSpec(result.name.clone()),
                                ),
                                other => RunError::Internal(format!(
                                    "invalid external result for {}: {other}",
                                    result.name
                                )),
                            })?;
                    }
                    let uses: Vec<(String, String, serde_json::Value)> = calls
                        .iter()
                        .map(|c| (c.tool_call_id.to_string(), c.name.clone(), c.payload.clone()))
                        .collect();
                    state.ledger.append_tool_uses(&uses);
                    let entries: Vec<(String, serde_json::Value, bool)> = results
                        .iter()
                        .map(|r| (r.tool_call_id.to_string(), r.result.clone(), false))
                        .collect();
                    state.ledger.append_tool_results(&entries);
                    for result in results {
                        let event = ToolEvent {
                            name: result.name.clone(),
                            tool_call_id: result.tool_call_id.clone(),
                            result: Some(result.result.clone()),
                            error: None,
                            retry_hint: None,
                            artifacts: Vec::new(),
                            bounds: None,
                            telemetry: None,
                            children_count: 0,
                            run_link: None,
                            result_omitted: false,
                            omitted_reason: None,
                        };
                        self.publish_result(input, state, &event).await;
                        state.tool_events.push(event.clone());
                        extra_events.push(event);
                    }
                }
                (
                    EntryPayload::Confirmation(confirmation),
                    AwaitResolution::Confirmation { approved, .. },
                ) => {
                    let hit_terminal = approved && confirmation.terminal;
                    let event = self
                        .settle_confirmation(input, state, confirmation, approved)
                        .await?;
                    if approved {
                        state.caps.charge_tools(1);
                    }
                    state.tool_events.push(event.clone());
                    extra_events.push(event);
                    terminal = terminal || hit_terminal;
                }
                (_payload, _resolution) => {
                    warn!(run = %input.run_id, "await resolution shape mismatch");
                    return Err(RunError::Await(AwaitError::EmptyResults));
                }
            }
        }

        Ok(AwaitOutcome::Resolved {
            extra_events,
            terminal,
        })
    }

    /// Execute an approved confirmation, or synthesize the denied pair.
    /// A denied call resolves with a nil error so it never counts as a
    /// failure.
    async fn settle_confirmation(
        &self,
        input: &RunInput,
        state: &mut LoopState,
        confirmation: PendingConfirmation,
        approved: bool,
    ) -> Result<ToolEvent, RunError> {
        let call = confirmation.call;
        let call_id = call
            .tool_call_id
            .clone()
            .unwrap_or_else(|| ToolCallId::new(""));

        state.ledger.append_tool_uses(&[(
            call_id.to_string(),
            call.name.clone(),
            call.payload.clone(),
        )]);
        self.publish(
            input,
            state,
            EventKind::ToolCallScheduled {
                tool_call_id: call_id.clone(),
                tool: call.name.clone(),
                payload: call.payload.clone(),
                parent_tool_call_id: call.parent_tool_call_id.clone(),
            },
        )
        .await;

        let event = if approved {
            if confirmation.is_agent_tool {
                let spec = self
                    .registry
                    .tool_spec(&call.name)
                    .ok_or_else(|| RunError::Tool(axon_types::ToolError::UnknownTool(call.name.clone())))?;
                self.run_agent_tool(input, state, &call, spec.as_ref()).await
            } else {
                match self
                    .engine
                    .execute_tool(call.clone(), ActivityOptions::default())
                    .await
                {
                    Ok(event) => event,
                    Err(error) => ToolEvent {
                        name: call.name.clone(),
                        tool_call_id: call_id.clone(),
                        result: None,
                        error: Some(error.to_string()),
                        retry_hint: None,
                        artifacts: Vec::new(),
                        bounds: None,
                        telemetry: None,
                        children_count: 0,
                        run_link: None,
                        result_omitted: false,
                        omitted_reason: None,
                    },
                }
            }
        } else {
            // The planner sees a resolved, non-failing outcome built
            // from the denied-result template.
            ToolEvent {
                name: call.name.clone(),
                tool_call_id: call_id.clone(),
                result: Some(confirmation.denied_result.clone()),
                error: None,
                retry_hint: None,
                artifacts: Vec::new(),
                bounds: None,
                telemetry: None,
                children_count: 0,
                run_link: None,
                result_omitted: false,
                omitted_reason: None,
            }
        };

        self.publish_result(input, state, &event).await;
        state.ledger.append_tool_results(&[(
            call_id.to_string(),
            event
                .result
                .clone()
                .unwrap_or_else(|| json!({ "error": event.error })),
            event.is_failure(),
        )]);
        Ok(event)
    }

    /// Block for the resolution of one await item, servicing pauses
    /// inline ("pause the clock"): paused time extends the deadline and
    /// therefore the await budget.
    async fn wait_for_resolution(
        &self,
        input: &RunInput,
        state: &mut LoopState,
        control: &Arc<dyn SignalReceiver>,
        await_id: &AwaitId,
    ) -> Result<AwaitResolution, WaitFailure> {
        loop {
            let timeout = state.remaining_await(self.engine.now());
            if timeout.is_some_and(|t| t.is_zero()) {
                return Err(WaitFailure::Timeout);
            }
            match control.receive(timeout).await {
                Ok(value) => match serde_json::from_value::<ControlSignal>(value) {
                    Ok(ControlSignal::Await(resolution)) => {
                        let got = resolution_await_id(&resolution);
                        if got != await_id {
                            return Err(WaitFailure::Fatal(RunError::Await(
                                AwaitError::IdMismatch {
                                    expected: await_id.clone(),
                                    got: got.clone(),
                                },
                            )));
                        }
                        return Ok(resolution);
                    }
                    Ok(ControlSignal::Pause(request)) => {
                        let paused_at = self.engine.now();
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
                        let reason = self.wait_for_resume(control).await;
                        state.credit_pause(self.engine.now() - paused_at);
                        self.publish(input, state, EventKind::RunResumed { reason })
                            .await;
                    }
                    Ok(ControlSignal::Resume(_)) => continue,
                    Err(e) => {
                        warn!(run = %input.run_id, error = %e, "malformed control signal");
                        continue;
                    }
                },
                Err(SignalError::DeadlineExceeded) | Err(SignalError::Closed) => {
                    return Err(WaitFailure::Timeout);
                }
            }
        }
    }

    async fn wait_for_resume(&self, control: &Arc<dyn SignalReceiver>) -> String {
        loop {
            match control.receive(None).await {
                Ok(value) => {
                    if let Ok(ControlSignal::Resume(resume)) =
                        serde_json::from_value::<ControlSignal>(value)
                    {
                        return resume.reason.unwrap_or_else(|| "resume_request".into());
                    }
                }
                Err(_) => return "resume_timeout".into(),
            }
        }
    }
}

enum WaitFailure {
    Timeout,
    Fatal(RunError),
}

fn resolution_await_id(resolution: &AwaitResolution) -> &AwaitId {
    match resolution {
        AwaitResolution::Clarification { await_id, .. }
        | AwaitResolution::Answers { await_id, .. }
        | AwaitResolution::ToolResults { await_id, .. }
        | AwaitResolution::Confirmation { await_id, .. } => await_id,
    }
}

fn default_confirmation(tool: &str) -> ConfirmationSpec {
    ConfirmationSpec {
        title: format!("Confirm {tool}"),
        prompt_template: format!("Allow the call to {tool}?"),
        denied_result_template: "null".to_owned(),
    }
}
