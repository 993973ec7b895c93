//! End-to-end scenarios against the local engine with a scripted
//! planner, plus the cross-cutting event invariants: every terminated
//! run balances `RunPaused`/`RunResumed`, and sequence numbers are
//! strictly increasing from 1 within each turn.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axon_engine_local::LocalRuntime;
use axon_hooks::{
    CompletionStatus, EventKind, HookBus, HookSubscriber, RunEvent,
};
use axon_planner::Planner;
use axon_tool::{
    ConfirmationSpec, ExecutionOutput, ToolExecutor, ToolInvocation, ToolRegistry, ToolSpec,
    ToolValue, ToolsetRegistration, TypeSpec,
};
use axon_types::{
    AgentId, AgentSpec, AwaitItem, CapsState, ExternalToolCall, ExternalToolResult,
    FinalResponse, HookError, PlanError, PlanInput, PlanResult, PlanResumeInput, RunId,
    SessionId, TerminationReason, ToolCallId, ToolRequest,
};
use axon_workflow::{MissingFieldsPolicy, RunInput};
use serde::{Deserialize, Serialize};
use serde_json::json;

// --- harness ----------------------------------------------------------------

/// A planner that replays a fixed script of plan results.
struct ScriptedPlanner {
    script: Mutex<Vec<PlanResult>>,
    resumes: Mutex<u32>,
}

impl ScriptedPlanner {
    fn new(script: Vec<PlanResult>) -> Self {
        Self {
            script: Mutex::new(script),
            resumes: Mutex::new(0),
        }
    }

    fn pop(&self) -> PlanResult {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        if script.is_empty() {
            PlanResult::FinalResponse(FinalResponse::default())
        } else {
            script.remove(0)
        }
    }

    fn resume_count(&self) -> u32 {
        *self.resumes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan_start(&self, _input: PlanInput) -> Result<PlanResult, PlanError> {
        Ok(self.pop())
    }

    async fn plan_resume(&self, _input: PlanResumeInput) -> Result<PlanResult, PlanError> {
        *self.resumes.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(self.pop())
    }
}

/// Records every bus event for ordering assertions.
struct Recorder {
    seen: Mutex<Vec<RunEvent>>,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
        })
    }

    fn events(&self) -> Vec<RunEvent> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl HookSubscriber for Recorder {
    async fn on_event(&self, event: &RunEvent) -> Result<(), HookError> {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EmptyPayload {}

#[derive(Debug, Serialize, Deserialize)]
struct FieldPayload {
    field: String,
}

/// Executes every tool with a fixed `{"ok": true}` result.
struct OkExecutor;

#[async_trait]
impl ToolExecutor for OkExecutor {
    async fn execute(&self, _invocation: ToolInvocation) -> ExecutionOutput {
        ExecutionOutput::ok(ToolValue::json(&json!({"ok": true})))
    }
}

fn registry() -> Arc<ToolRegistry> {
    let registry = Arc::new(ToolRegistry::new());
    let tools = vec![
        ToolSpec::new(
            "svc.ts.tool",
            TypeSpec::of::<EmptyPayload>(json!({"type": "object"})),
            TypeSpec::of::<serde_json::Value>(json!({"type": "object"})),
        ),
        ToolSpec::new(
            "svc.ts.x",
            TypeSpec::of::<FieldPayload>(json!({
                "type": "object",
                "required": ["field"],
                "properties": { "field": { "type": "string" } }
            })),
            TypeSpec::of::<serde_json::Value>(json!({"type": "object"})),
        ),
        ToolSpec::new(
            "svc.ts.guarded",
            TypeSpec::of::<EmptyPayload>(json!({"type": "object"})),
            TypeSpec::of::<serde_json::Value>(json!({"type": "object"})),
        )
        .with_confirmation(ConfirmationSpec {
            title: "Confirm".into(),
            prompt_template: "ok".into(),
            denied_result_template: "null".into(),
        }),
        ToolSpec::new(
            "ext.t",
            TypeSpec::of::<serde_json::Value>(json!({"type": "object"})),
            TypeSpec::of::<serde_json::Value>(json!({"type": "object"})),
        ),
    ];
    registry
        .register_toolset(ToolsetRegistration::new("ts", tools, Arc::new(OkExecutor)))
        .unwrap();
    registry
}

fn runtime_with(planner: Arc<dyn Planner>) -> (LocalRuntime, Arc<Recorder>) {
    let bus = Arc::new(HookBus::new());
    let recorder = Recorder::new();
    bus.subscribe(recorder.clone());
    let runtime = LocalRuntime::builder(planner, registry()).bus(bus).build();
    (runtime, recorder)
}

fn run_input(run: &str) -> RunInput {
    RunInput::new(
        RunId::new(run),
        AgentSpec {
            agent_id: AgentId::new("agent-1"),
            ..Default::default()
        },
        SessionId::new("sess-1"),
        "do the thing",
    )
}

fn kinds(events: &[RunEvent]) -> Vec<&'static str> {
    events
        .iter()
        .map(|e| match &e.kind {
            EventKind::RunStarted { .. } => "run_started",
            EventKind::RunPhaseChanged { .. } => "run_phase_changed",
            EventKind::RunPaused { .. } => "run_paused",
            EventKind::RunResumed { .. } => "run_resumed",
            EventKind::RunCompleted { .. } => "run_completed",
            EventKind::AgentRunStarted { .. } => "agent_run_started",
            EventKind::AwaitClarification { .. } => "await_clarification",
            EventKind::AwaitQuestions { .. } => "await_questions",
            EventKind::AwaitConfirmation { .. } => "await_confirmation",
            EventKind::AwaitExternalTools { .. } => "await_external_tools",
            EventKind::ToolAuthorization { .. } => "tool_authorization",
            EventKind::AssistantMessage { .. } => "assistant_message",
            EventKind::PlannerNote { .. } => "planner_note",
            EventKind::ThinkingBlock { .. } => "thinking_block",
            EventKind::ToolCallScheduled { .. } => "tool_call_scheduled",
            EventKind::ToolCallUpdated { .. } => "tool_call_updated",
            EventKind::ToolCallArgsDelta { .. } => "tool_call_args_delta",
            EventKind::ToolResultReceived { .. } => "tool_result_received",
            EventKind::PolicyDecision { .. } => "policy_decision",
            EventKind::RetryHintIssued { .. } => "retry_hint_issued",
            EventKind::MemoryAppended { .. } => "memory_appended",
            EventKind::Usage { .. } => "usage",
            EventKind::HardProtectionTriggered { .. } => "hard_protection_triggered",
        })
        .collect()
}

/// Assert `expected` appears within `events` in order (other events may
/// interleave).
fn assert_subsequence(events: &[RunEvent], expected: &[&str]) {
    let got = kinds(events);
    let mut it = got.iter();
    for want in expected {
        assert!(
            it.any(|k| k == want),
            "missing `{want}` in order; events were {got:?}"
        );
    }
}

/// Invariants 1 and 2: balanced pause/resume, per-turn sequences
/// strictly increasing from 1.
fn assert_event_invariants(events: &[RunEvent]) {
    let paused = events
        .iter()
        .filter(|e| matches!(e.kind, EventKind::RunPaused { .. }))
        .count();
    let resumed = events
        .iter()
        .filter(|e| matches!(e.kind, EventKind::RunResumed { .. }))
        .count();
    assert_eq!(paused, resumed, "RunPaused/RunResumed must balance");

    let mut last: HashMap<(String, Option<String>), u64> = HashMap::new();
    for event in events {
        let key = (
            event.meta.run_id.to_string(),
            event.meta.turn_id.as_ref().map(ToString::to_string),
        );
        let previous = last.insert(key.clone(), event.meta.sequence);
        match previous {
            None => assert_eq!(event.meta.sequence, 1, "turn sequences start at 1"),
            Some(previous) => assert!(
                event.meta.sequence > previous,
                "sequence must increase within turn {key:?}"
            ),
        }
    }
}

// --- S1 ---------------------------------------------------------------------

#[tokio::test]
async fn s1_final_only() {
    let planner = Arc::new(ScriptedPlanner::new(vec![PlanResult::FinalResponse(
        FinalResponse {
            message: "ok".into(),
            ..Default::default()
        },
    )]));
    let (runtime, recorder) = runtime_with(planner);

    let output = runtime.start_run(run_input("s1")).await.unwrap();

    assert_eq!(output.final_message, "ok");
    assert_eq!(output.status, CompletionStatus::Success);
    assert!(output.tool_events.is_empty());

    let events = recorder.events();
    assert!(events.iter().any(|e| matches!(
        &e.kind,
        EventKind::AssistantMessage { text, .. } if text == "ok"
    )));
    assert_subsequence(&events, &["assistant_message", "run_completed"]);
    assert_event_invariants(&events);
}

// --- S2 ---------------------------------------------------------------------

#[tokio::test]
async fn s2_one_tool_one_resume() {
    let planner = Arc::new(ScriptedPlanner::new(vec![
        PlanResult::ToolCalls {
            calls: vec![ToolRequest::bare("svc.ts.tool", json!({}))],
            await_queue: vec![],
            expected_children: 0,
        },
        PlanResult::FinalResponse(FinalResponse {
            message: "done".into(),
            ..Default::default()
        }),
    ]));
    let (runtime, recorder) = runtime_with(planner.clone());

    let output = runtime.start_run(run_input("s2")).await.unwrap();

    assert_eq!(output.final_message, "done");
    assert_eq!(output.tool_events.len(), 1);
    assert_eq!(output.tool_events[0].result, Some(json!({"ok": true})));
    assert_eq!(planner.resume_count(), 1);

    let events = recorder.events();
    assert_subsequence(
        &events,
        &[
            "tool_call_scheduled",
            "tool_result_received",
            "assistant_message",
            "run_completed",
        ],
    );
    assert_event_invariants(&events);
}

// --- S3 ---------------------------------------------------------------------

#[tokio::test]
async fn s3_missing_fields_clarification_timeout() {
    let planner = Arc::new(ScriptedPlanner::new(vec![
        PlanResult::ToolCalls {
            calls: vec![ToolRequest::bare("svc.ts.x", json!({}))],
            await_queue: vec![],
            expected_children: 0,
        },
        // The finalize resume.
        PlanResult::FinalResponse(FinalResponse {
            message: "wrapped up".into(),
            ..Default::default()
        }),
    ]));
    let (runtime, recorder) = runtime_with(planner);

    let mut input = run_input("s3");
    input.policy.on_missing_fields = MissingFieldsPolicy::AwaitClarification;
    input.policy.finalize_reserve = Duration::ZERO;
    input.time_budget = Some(Duration::from_millis(300));

    let output = runtime.start_run(input).await.unwrap();

    assert_eq!(
        output.termination,
        Some(TerminationReason::ClarificationTimeout)
    );
    let events = recorder.events();
    assert_subsequence(
        &events,
        &[
            "await_clarification",
            "run_paused",
            "run_resumed",
            "run_completed",
        ],
    );
    assert!(events.iter().any(|e| matches!(
        &e.kind,
        EventKind::RunResumed { reason } if reason == "clarification_timeout"
    )));
    assert_event_invariants(&events);
}

// --- S4 ---------------------------------------------------------------------

#[tokio::test]
async fn s4_confirmation_denied() {
    let planner = Arc::new(ScriptedPlanner::new(vec![
        PlanResult::ToolCalls {
            calls: vec![ToolRequest::bare("svc.ts.guarded", json!({}))],
            await_queue: vec![],
            expected_children: 0,
        },
        PlanResult::FinalResponse(FinalResponse {
            message: "understood".into(),
            ..Default::default()
        }),
    ]));
    let (runtime, recorder) = runtime_with(planner);
    let runtime = Arc::new(runtime);
    let mut stream = runtime.subscribe_stream(256);

    let run_id = RunId::new("s4");
    let operator = {
        let runtime = runtime.clone();
        let run_id = run_id.clone();
        tokio::spawn(async move {
            while let Some(event) = stream.recv().await {
                if let EventKind::AwaitConfirmation { await_id, .. } = event.kind {
                    runtime
                        .provide_confirmation(&run_id, await_id, false, "user")
                        .await
                        .unwrap();
                    break;
                }
            }
        })
    };

    let output = runtime.start_run(run_input("s4")).await.unwrap();
    operator.await.unwrap();

    // Property 8: a denied confirmation resolves without an error.
    let denied = &output.tool_events[0];
    assert!(denied.error.is_none());
    assert_eq!(denied.result, Some(serde_json::Value::Null));

    let events = recorder.events();
    assert_subsequence(
        &events,
        &[
            "await_confirmation",
            "run_paused",
            "tool_authorization",
            "run_resumed",
            "tool_call_scheduled",
            "tool_result_received",
            "run_completed",
        ],
    );
    let authorizations: Vec<_> = events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::ToolAuthorization { approved, .. } => Some(*approved),
            _ => None,
        })
        .collect();
    assert_eq!(authorizations, vec![false]);
    assert_event_invariants(&events);
}

// --- S5 ---------------------------------------------------------------------

#[tokio::test]
async fn s5_tool_cap_exhausted() {
    let planner = Arc::new(ScriptedPlanner::new(vec![
        PlanResult::ToolCalls {
            calls: vec![
                ToolRequest::bare("svc.ts.tool", json!({})),
                ToolRequest::bare("svc.ts.tool", json!({})),
            ],
            await_queue: vec![],
            expected_children: 0,
        },
        PlanResult::ToolCalls {
            calls: vec![ToolRequest::bare("svc.ts.tool", json!({}))],
            await_queue: vec![],
            expected_children: 0,
        },
        // The finalize resume.
        PlanResult::FinalResponse(FinalResponse {
            message: "capped".into(),
            ..Default::default()
        }),
    ]));
    let (runtime, recorder) = runtime_with(planner);

    let mut input = run_input("s5");
    input.caps = CapsState::new(1, 0);

    let output = runtime.start_run(input).await.unwrap();

    // The batch was capped to one call; the second plan's request never
    // executed.
    assert_eq!(output.tool_events.len(), 1);
    assert_eq!(output.termination, Some(TerminationReason::ToolCap));
    assert_eq!(output.final_message, "capped");
    assert_event_invariants(&recorder.events());
}

// --- S6 ---------------------------------------------------------------------

#[tokio::test]
async fn s6_external_await() {
    let planner = Arc::new(ScriptedPlanner::new(vec![
        PlanResult::Await {
            queue: vec![AwaitItem::ExternalTools {
                calls: vec![ExternalToolCall {
                    name: "ext.t".into(),
                    tool_call_id: ToolCallId::new("ext-1"),
                    payload: json!({}),
                }],
            }],
        },
        PlanResult::FinalResponse(FinalResponse {
            message: "thanks".into(),
            ..Default::default()
        }),
    ]));
    let (runtime, recorder) = runtime_with(planner.clone());
    let runtime = Arc::new(runtime);
    let mut stream = runtime.subscribe_stream(256);

    let run_id = RunId::new("s6");
    let operator = {
        let runtime = runtime.clone();
        let run_id = run_id.clone();
        tokio::spawn(async move {
            while let Some(event) = stream.recv().await {
                if let EventKind::AwaitExternalTools { await_id, .. } = event.kind {
                    runtime
                        .provide_tool_results(
                            &run_id,
                            await_id,
                            vec![ExternalToolResult {
                                tool_call_id: ToolCallId::new("ext-1"),
                                name: "ext.t".into(),
                                result: json!({"ok": true}),
                            }],
                        )
                        .await
                        .unwrap();
                    break;
                }
            }
        })
    };

    let output = runtime.start_run(run_input("s6")).await.unwrap();
    operator.await.unwrap();

    assert_eq!(output.final_message, "thanks");
    assert_eq!(output.tool_events.len(), 1);
    assert_eq!(
        output.tool_events[0].tool_call_id,
        ToolCallId::new("ext-1")
    );
    // The planner resumed exactly once after the await resolved.
    assert_eq!(planner.resume_count(), 1);
    assert_event_invariants(&recorder.events());
}

// --- run store projection ---------------------------------------------------

#[tokio::test]
async fn run_store_records_the_completed_run() {
    use axon_hooks::{MemoryRunStore, RunStore};
    use axon_types::RunStatus;

    let planner = Arc::new(ScriptedPlanner::new(vec![PlanResult::FinalResponse(
        FinalResponse {
            message: "ok".into(),
            ..Default::default()
        },
    )]));
    let store = Arc::new(MemoryRunStore::new());
    let runtime = LocalRuntime::builder(planner, registry())
        .run_store(store.clone())
        .build();

    runtime.start_run(run_input("stored")).await.unwrap();

    let record = store
        .load(&RunId::new("stored"))
        .await
        .unwrap()
        .expect("record projected");
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.agent_id, AgentId::new("agent-1"));
}

// --- pause/resume -----------------------------------------------------------

#[tokio::test]
async fn queued_pause_is_consumed_and_balanced() {
    let planner = Arc::new(ScriptedPlanner::new(vec![
        PlanResult::ToolCalls {
            calls: vec![ToolRequest::bare("svc.ts.tool", json!({}))],
            await_queue: vec![],
            expected_children: 0,
        },
        PlanResult::FinalResponse(FinalResponse {
            message: "done".into(),
            ..Default::default()
        }),
    ]));
    let (runtime, recorder) = runtime_with(planner);
    let runtime = Arc::new(runtime);
    let mut stream = runtime.subscribe_stream(256);

    let run_id = RunId::new("paused-run");
    // Queue the pause before the run starts; the loop consumes it at
    // its first checkpoint.
    runtime
        .pause(
            &run_id,
            axon_workflow::PauseRequest {
                reason: "operator_hold".into(),
                requested_by: Some("ops".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let resumer = {
        let runtime = runtime.clone();
        let run_id = run_id.clone();
        tokio::spawn(async move {
            while let Some(event) = stream.recv().await {
                if matches!(event.kind, EventKind::RunPaused { .. }) {
                    runtime.resume(&run_id, None).await.unwrap();
                    break;
                }
            }
        })
    };

    let mut input = run_input("paused-run");
    input.run_id = run_id.clone();
    let output = runtime.start_run(input).await.unwrap();
    resumer.await.unwrap();

    assert_eq!(output.final_message, "done");
    let events = recorder.events();
    assert!(events.iter().any(|e| matches!(
        &e.kind,
        EventKind::RunPaused { reason, .. } if reason == "operator_hold"
    )));
    assert_event_invariants(&events);
}
