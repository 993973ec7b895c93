//! Dispatch pipeline behavior: guard rails, validation hints, adapters,
//! telemetry fallback, and bounded results.

use std::sync::Arc;

use async_trait::async_trait;
use axon_tool::{
    BoundedValue, DecodedPayload, DispatchContext, Dispatcher, ExecutionOutput, PayloadAdapter,
    TelemetryBuilder, ToolExecutor, ToolInvocation, ToolRegistry, ToolSpec, ToolValue,
    ToolsetRegistration, TypeSpec,
};
use axon_types::{
    AgentId, Bounds, RetryReason, RunId, SessionId, ToolCallMeta, ToolError, ToolRequest,
    ToolTelemetry, TurnId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LookupPayload {
    account: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LookupResult {
    items: Vec<String>,
    truncated: bool,
}

impl BoundedValue for LookupResult {
    fn bounds(&self) -> Bounds {
        Bounds {
            returned: self.items.len() as u64,
            total: None,
            truncated: self.truncated,
            next_cursor: None,
            refine_hint: None,
        }
    }
}

/// Echoes the decoded account back as a one-item result.
struct LookupExecutor;

#[async_trait]
impl ToolExecutor for LookupExecutor {
    async fn execute(&self, invocation: ToolInvocation) -> ExecutionOutput {
        let account = match &invocation.payload {
            DecodedPayload::Typed(value) => value
                .downcast_ref::<LookupPayload>()
                .map(|p| p.account.clone())
                .unwrap_or_default(),
            DecodedPayload::Raw(value) => value
                .get("account")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_owned(),
        };
        ExecutionOutput::ok(ToolValue::typed(LookupResult {
            items: vec![account],
            truncated: false,
        }))
    }
}

fn lookup_spec() -> ToolSpec {
    ToolSpec::new(
        "svc.ledger.lookup",
        TypeSpec::of::<LookupPayload>(json!({
            "type": "object",
            "required": ["account"],
            "properties": {
                "account": { "type": "string", "description": "Account identifier" }
            }
        }))
        .with_example(json!({"account": "acct-1"})),
        TypeSpec::of::<LookupResult>(json!({"type": "object"})).with_bounds::<LookupResult>(),
    )
    .bounded()
}

fn request(name: &str, payload: serde_json::Value) -> ToolRequest {
    let mut request = ToolRequest::bare(name, payload);
    request.run_id = RunId::new("run-1");
    request.agent_id = AgentId::new("agent-1");
    request.session_id = SessionId::new("sess-1");
    request.turn_id = Some(TurnId::new("turn-1"));
    request
}

fn dispatcher_with(registration: ToolsetRegistration) -> Dispatcher {
    let registry = Arc::new(ToolRegistry::new());
    registry.register_toolset(registration).unwrap();
    Dispatcher::new(registry)
}

#[tokio::test]
async fn empty_tool_name_is_rejected() {
    let dispatcher = dispatcher_with(ToolsetRegistration::new(
        "ledger",
        vec![lookup_spec()],
        Arc::new(LookupExecutor),
    ));
    let err = dispatcher
        .dispatch(&request("", json!({})), DispatchContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::EmptyName));
}

#[tokio::test]
async fn agent_tools_may_not_run_as_activities() {
    let agent_spec = ToolSpec::new(
        "svc.agents.research",
        TypeSpec::opaque(json!({"type": "object"})),
        TypeSpec::opaque(json!({"type": "object"})),
    )
    .agent_tool();
    let dispatcher = dispatcher_with(
        ToolsetRegistration::new("agents", vec![agent_spec], Arc::new(LookupExecutor))
            .decode_in_executor(),
    );
    let err = dispatcher
        .dispatch(
            &request("svc.agents.research", json!({})),
            DispatchContext::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::AgentToolViaActivity(_)));
}

#[tokio::test]
async fn missing_required_field_yields_retry_hint() {
    let dispatcher = dispatcher_with(ToolsetRegistration::new(
        "ledger",
        vec![lookup_spec()],
        Arc::new(LookupExecutor),
    ));
    let event = dispatcher
        .dispatch(
            &request("svc.ledger.lookup", json!({})),
            DispatchContext::default(),
        )
        .await
        .unwrap();
    assert!(event.is_failure());
    let hint = event.retry_hint.expect("retry hint");
    assert_eq!(hint.reason, RetryReason::MissingFields);
    assert_eq!(hint.missing_fields, vec!["account"]);
    assert!(
        hint.clarifying_question
            .unwrap()
            .contains("Account identifier")
    );
}

#[tokio::test]
async fn successful_dispatch_returns_encoded_result_and_bounds() {
    let dispatcher = dispatcher_with(ToolsetRegistration::new(
        "ledger",
        vec![lookup_spec()],
        Arc::new(LookupExecutor),
    ));
    let event = dispatcher
        .dispatch(
            &request("svc.ledger.lookup", json!({"account": "acct-9"})),
            DispatchContext::default(),
        )
        .await
        .unwrap();
    assert!(!event.is_failure());
    assert_eq!(event.result.unwrap()["items"], json!(["acct-9"]));
    let bounds = event.bounds.expect("bounds derived from typed result");
    assert_eq!(bounds.returned, 1);
    assert!(!bounds.truncated);
}

#[tokio::test]
async fn payload_adapter_errors_surface_as_failed_events() {
    struct RejectingAdapter;
    impl PayloadAdapter for RejectingAdapter {
        fn adapt(
            &self,
            _tool: &str,
            _payload: serde_json::Value,
        ) -> Result<serde_json::Value, Box<dyn std::error::Error + Send + Sync>> {
            Err("nope".into())
        }
    }

    let dispatcher = dispatcher_with(
        ToolsetRegistration::new("ledger", vec![lookup_spec()], Arc::new(LookupExecutor))
            .with_payload_adapter(Arc::new(RejectingAdapter)),
    );
    let event = dispatcher
        .dispatch(
            &request("svc.ledger.lookup", json!({"account": "a"})),
            DispatchContext::default(),
        )
        .await
        .unwrap();
    assert!(event.error.unwrap().contains("payload adapter failed"));
}

#[tokio::test]
async fn telemetry_builder_fills_missing_telemetry() {
    struct FixedTelemetry;
    impl TelemetryBuilder for FixedTelemetry {
        fn build(
            &self,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
            _meta: &ToolCallMeta,
        ) -> ToolTelemetry {
            ToolTelemetry {
                duration_ms: (end - start).num_milliseconds().max(0) as u64,
                model: None,
                tokens_used: None,
            }
        }
    }

    let dispatcher = dispatcher_with(
        ToolsetRegistration::new("ledger", vec![lookup_spec()], Arc::new(LookupExecutor))
            .with_telemetry_builder(Arc::new(FixedTelemetry)),
    );
    let event = dispatcher
        .dispatch(
            &request("svc.ledger.lookup", json!({"account": "a"})),
            DispatchContext::default(),
        )
        .await
        .unwrap();
    assert!(event.telemetry.is_some());
}

#[tokio::test]
async fn bounded_tool_without_derivable_bounds_is_fatal() {
    #[derive(Debug, Serialize, Deserialize)]
    struct Unbounded {
        ok: bool,
    }

    struct UnboundedExecutor;
    #[async_trait]
    impl ToolExecutor for UnboundedExecutor {
        async fn execute(&self, _invocation: ToolInvocation) -> ExecutionOutput {
            ExecutionOutput::ok(ToolValue::typed(Unbounded { ok: true }))
        }
    }

    // Bounded flag set but the result spec has no bounds derivation.
    let spec = ToolSpec::new(
        "svc.ledger.scan",
        TypeSpec::of::<LookupPayload>(json!({"type": "object"})),
        TypeSpec::of::<Unbounded>(json!({"type": "object"})),
    )
    .bounded();
    let dispatcher = dispatcher_with(ToolsetRegistration::new(
        "scan",
        vec![spec],
        Arc::new(UnboundedExecutor),
    ));
    let err = dispatcher
        .dispatch(
            &request("svc.ledger.scan", json!({"account": "a"})),
            DispatchContext::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::MissingBounds(_)));
}

#[tokio::test]
async fn executor_failure_carries_children_count() {
    struct FailingExecutor;
    #[async_trait]
    impl ToolExecutor for FailingExecutor {
        async fn execute(&self, _invocation: ToolInvocation) -> ExecutionOutput {
            let mut out = ExecutionOutput::failed("backend unavailable");
            out.children_count = 2;
            out
        }
    }

    let dispatcher = dispatcher_with(ToolsetRegistration::new(
        "ledger",
        vec![lookup_spec()],
        Arc::new(FailingExecutor),
    ));
    let event = dispatcher
        .dispatch(
            &request("svc.ledger.lookup", json!({"account": "a"})),
            DispatchContext::default(),
        )
        .await
        .unwrap();
    assert_eq!(event.error.as_deref(), Some("backend unavailable"));
    assert_eq!(event.children_count, 2);
}
