//! Registry behavior: idempotent registration, collisions, lookups,
//! and the marshal/unmarshal contract.

use std::sync::Arc;

use async_trait::async_trait;
use axon_tool::{
    CodecKind, ExecutionOutput, ToolExecutor, ToolInvocation, ToolRegistry, ToolSpec,
    ToolValue, ToolsetRegistration, TypeSpec,
};
use axon_types::{CodecError, RegistryError};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
struct EchoPayload {
    text: String,
}

struct NoopExecutor;

#[async_trait]
impl ToolExecutor for NoopExecutor {
    async fn execute(&self, _invocation: ToolInvocation) -> ExecutionOutput {
        ExecutionOutput::ok(ToolValue::json(&serde_json::Value::Null))
    }
}

fn echo_spec(name: &str) -> ToolSpec {
    // Generated registrations derive the schema blob; tests do the same.
    let schema = serde_json::to_value(schemars::schema_for!(EchoPayload))
        .expect("schema serializes");
    ToolSpec::new(
        name,
        TypeSpec::of::<EchoPayload>(schema),
        TypeSpec::of::<EchoPayload>(json!({"type": "object"})),
    )
}

fn registration(toolset: &str, tools: Vec<ToolSpec>) -> ToolsetRegistration {
    ToolsetRegistration::new(toolset, tools, Arc::new(NoopExecutor))
}

#[test]
fn registration_is_idempotent_by_name() {
    let registry = ToolRegistry::new();
    registry
        .register_toolset(registration("echo", vec![echo_spec("svc.echo.say")]))
        .unwrap();
    // Same toolset name again: no-op, no error.
    registry
        .register_toolset(registration("echo", vec![echo_spec("svc.echo.say")]))
        .unwrap();
    assert_eq!(registry.tool_names(), vec!["svc.echo.say"]);
}

#[test]
fn cross_toolset_collision_fails() {
    let registry = ToolRegistry::new();
    registry
        .register_toolset(registration("echo", vec![echo_spec("svc.echo.say")]))
        .unwrap();
    let err = registry
        .register_toolset(registration("other", vec![echo_spec("svc.echo.say")]))
        .unwrap_err();
    assert!(matches!(
        err,
        RegistryError::ToolCollision { tool, existing }
            if tool == "svc.echo.say" && existing == "echo"
    ));
}

#[test]
fn unknown_tool_lookup_returns_none() {
    let registry = ToolRegistry::new();
    assert!(registry.tool_spec("nope").is_none());
    assert!(registry.resolve_name("nope").is_none());
}

#[test]
fn raw_json_bytes_marshal_as_defensive_copy() {
    let registry = ToolRegistry::new();
    registry
        .register_toolset(registration("echo", vec![echo_spec("svc.echo.say")]))
        .unwrap();

    // Key order and whitespace survive untouched.
    let raw = br#"{"z": 1, "a": 2}"#.to_vec();
    let out = registry
        .marshal_tool_value(
            "svc.echo.say",
            &ToolValue::Bytes(raw.clone()),
            CodecKind::Payload,
        )
        .unwrap();
    assert_eq!(out, raw);
}

#[test]
fn invalid_bytes_do_not_pass_through() {
    let registry = ToolRegistry::new();
    registry
        .register_toolset(registration("echo", vec![echo_spec("svc.echo.say")]))
        .unwrap();
    let err = registry
        .marshal_tool_value(
            "svc.echo.say",
            &ToolValue::Bytes(b"not json".to_vec()),
            CodecKind::Payload,
        )
        .unwrap_err();
    assert!(matches!(err, CodecError::Syntax(_)));
}

#[test]
fn typed_values_round_trip_through_the_codec() {
    let registry = ToolRegistry::new();
    registry
        .register_toolset(registration("echo", vec![echo_spec("svc.echo.say")]))
        .unwrap();

    let value = EchoPayload {
        text: "hello".into(),
    };
    let raw = registry
        .marshal_tool_value(
            "svc.echo.say",
            &ToolValue::typed(value.clone()),
            CodecKind::Payload,
        )
        .unwrap();
    let decoded = registry
        .unmarshal_tool_value("svc.echo.say", &raw, CodecKind::Payload)
        .unwrap();
    assert_eq!(decoded.downcast_ref::<EchoPayload>(), Some(&value));
}

#[test]
fn unmarshal_without_codec_is_a_contract_violation() {
    let registry = ToolRegistry::new();
    let opaque = ToolSpec::new(
        "svc.blob.put",
        TypeSpec::opaque(json!({"type": "object"})),
        TypeSpec::opaque(json!({"type": "object"})),
    );
    registry
        .register_toolset(registration("blob", vec![opaque]))
        .unwrap();
    let err = registry
        .unmarshal_tool_value("svc.blob.put", b"{}", CodecKind::Payload)
        .unwrap_err();
    assert!(matches!(err, CodecError::MissingCodec(_)));
}

#[test]
fn rewriter_resolves_unknown_names() {
    struct StripPrefix;
    impl axon_tool::ToolNameRewriter for StripPrefix {
        fn rewrite(&self, name: &str) -> Option<String> {
            name.strip_prefix("alias_").map(|_| "svc.echo.say".to_owned())
        }
    }

    let registry = ToolRegistry::new();
    registry
        .register_toolset(registration("echo", vec![echo_spec("svc.echo.say")]))
        .unwrap();
    registry.set_rewriter(Arc::new(StripPrefix));

    assert_eq!(
        registry.resolve_name("alias_anything").as_deref(),
        Some("svc.echo.say")
    );
    assert_eq!(
        registry.resolve_name("svc.echo.say").as_deref(),
        Some("svc.echo.say")
    );
    assert!(registry.resolve_name("unmapped").is_none());
}
