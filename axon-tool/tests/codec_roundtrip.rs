//! Property tests: codec round-trip fidelity.

use std::sync::Arc;

use async_trait::async_trait;
use axon_tool::{
    CodecKind, ExecutionOutput, ToolExecutor, ToolInvocation, ToolRegistry, ToolSpec, ToolValue,
    ToolsetRegistration, TypeSpec,
};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Sample {
    name: String,
    count: u32,
    flags: Vec<bool>,
    note: Option<String>,
}

struct NoopExecutor;

#[async_trait]
impl ToolExecutor for NoopExecutor {
    async fn execute(&self, _invocation: ToolInvocation) -> ExecutionOutput {
        ExecutionOutput::ok(ToolValue::json(&serde_json::Value::Null))
    }
}

fn sample_registry() -> ToolRegistry {
    let registry = ToolRegistry::new();
    registry
        .register_toolset(ToolsetRegistration::new(
            "samples",
            vec![ToolSpec::new(
                "svc.samples.echo",
                TypeSpec::of::<Sample>(json!({"type": "object"})),
                TypeSpec::of::<Sample>(json!({"type": "object"})),
            )],
            Arc::new(NoopExecutor),
        ))
        .unwrap();
    registry
}

fn sample_strategy() -> impl Strategy<Value = Sample> {
    (
        "[a-zA-Z0-9 ]{0,16}",
        any::<u32>(),
        prop::collection::vec(any::<bool>(), 0..4),
        prop::option::of("[a-z]{0,8}"),
    )
        .prop_map(|(name, count, flags, note)| Sample {
            name,
            count,
            flags,
            note,
        })
}

proptest! {
    #[test]
    fn unmarshal_inverts_marshal(sample in sample_strategy()) {
        let registry = sample_registry();
        let raw = registry
            .marshal_tool_value(
                "svc.samples.echo",
                &ToolValue::typed(sample.clone()),
                CodecKind::Payload,
            )
            .unwrap();
        let decoded = registry
            .unmarshal_tool_value("svc.samples.echo", &raw, CodecKind::Payload)
            .unwrap();
        prop_assert_eq!(decoded.downcast_ref::<Sample>(), Some(&sample));
    }

    #[test]
    fn valid_json_bytes_pass_through_unchanged(
        key in "[a-z]{1,8}",
        value in "[a-z0-9]{0,12}",
        pad in 0usize..4,
    ) {
        // Hand-built JSON with deliberate whitespace — the registry must
        // return the exact bytes, not a re-encoding.
        let spaces = " ".repeat(pad);
        let raw = format!("{{{spaces}\"{key}\": \"{value}\"}}").into_bytes();
        let registry = sample_registry();
        let out = registry
            .marshal_tool_value(
                "svc.samples.echo",
                &ToolValue::Bytes(raw.clone()),
                CodecKind::Result,
            )
            .unwrap();
        prop_assert_eq!(out, raw);
    }
}
