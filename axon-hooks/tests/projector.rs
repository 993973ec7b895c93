//! Run store projection: status transitions, label merges, idempotent
//! convergence under duplicate delivery.

use std::collections::BTreeMap;
use std::sync::Arc;

use axon_hooks::{
    CompletionStatus, EventKind, EventMeta, HookBus, MemoryRunStore, RunEvent, RunStore,
    RunStoreProjector,
};
use axon_types::{AgentId, RunId, RunStatus, SessionId};

fn meta() -> EventMeta {
    EventMeta::new(RunId::new("r1"), AgentId::new("a1"), SessionId::new("s1"))
}

fn bus_with_store() -> (HookBus, Arc<MemoryRunStore>) {
    let store = Arc::new(MemoryRunStore::new());
    let bus = HookBus::new();
    bus.subscribe(Arc::new(RunStoreProjector::new(store.clone())));
    (bus, store)
}

#[tokio::test]
async fn lifecycle_transitions_project_into_status() {
    let (bus, store) = bus_with_store();

    bus.publish(RunEvent::new(
        meta(),
        EventKind::RunStarted {
            labels: BTreeMap::from([("tier".to_owned(), "gold".to_owned())]),
        },
    ))
    .await
    .unwrap();
    let record = store.load(&RunId::new("r1")).await.unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Running);
    assert_eq!(record.labels.get("tier").map(String::as_str), Some("gold"));

    bus.publish(RunEvent::new(
        meta(),
        EventKind::RunPaused {
            reason: "await_queue".into(),
            requested_by: None,
            labels: BTreeMap::new(),
            metadata: BTreeMap::new(),
        },
    ))
    .await
    .unwrap();
    assert_eq!(
        store.load(&RunId::new("r1")).await.unwrap().unwrap().status,
        RunStatus::Paused
    );

    bus.publish(RunEvent::new(
        meta(),
        EventKind::RunResumed {
            reason: "resume_request".into(),
        },
    ))
    .await
    .unwrap();
    assert_eq!(
        store.load(&RunId::new("r1")).await.unwrap().unwrap().status,
        RunStatus::Running
    );

    bus.publish(RunEvent::new(
        meta(),
        EventKind::RunCompleted {
            status: CompletionStatus::Success,
            error: None,
            usage: None,
        },
    ))
    .await
    .unwrap();
    assert_eq!(
        store.load(&RunId::new("r1")).await.unwrap().unwrap().status,
        RunStatus::Completed
    );
}

#[tokio::test]
async fn duplicate_delivery_converges() {
    let (bus, store) = bus_with_store();

    let completed = RunEvent::new(
        meta(),
        EventKind::RunCompleted {
            status: CompletionStatus::Failed,
            error: Some("boom".into()),
            usage: None,
        },
    );
    // Activity retries can deliver the same projection twice.
    bus.publish(completed.clone()).await.unwrap();
    bus.publish(completed).await.unwrap();

    let record = store.load(&RunId::new("r1")).await.unwrap().unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("boom"));
    assert_eq!(store.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn policy_decisions_merge_labels_and_metadata() {
    let (bus, store) = bus_with_store();

    bus.publish(RunEvent::new(
        meta(),
        EventKind::PolicyDecision {
            allowed_tools: Some(vec!["svc.ts.x".into()]),
            disable_tools: false,
            labels: BTreeMap::from([("policy".to_owned(), "strict".to_owned())]),
            metadata: BTreeMap::from([(
                "decided_by".to_owned(),
                serde_json::json!("policy-v2"),
            )]),
        },
    ))
    .await
    .unwrap();

    let record = store.load(&RunId::new("r1")).await.unwrap().unwrap();
    assert_eq!(
        record.labels.get("policy").map(String::as_str),
        Some("strict")
    );
    assert_eq!(
        record.metadata.get("decided_by"),
        Some(&serde_json::json!("policy-v2"))
    );
}
