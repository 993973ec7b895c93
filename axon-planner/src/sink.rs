//! The planner event sink: streams model output into hook events and
//! the transcript ledger, aggregating token usage as it goes.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

use axon_hooks::{EventKind, EventMeta, HookBus, RunEvent};
use axon_types::{HookError, TokenUsage, ToolCallId};

use crate::ledger::TranscriptLedger;
use crate::stream::ModelEvent;

struct SinkState {
    ledger: TranscriptLedger,
    usage: TokenUsage,
    hook_err: Option<HookError>,
}

/// Per-turn decorator over the model stream.
///
/// Text chunks become streamed `AssistantMessage` events, thinking parts
/// become `ThinkingBlock` events (and never leak into assistant chunks),
/// usage deltas aggregate, and tool-argument fragments are forwarded
/// best-effort as `ToolCallArgsDelta`. The first hook failure sets a
/// sticky error; the sink keeps recording the ledger but stops emitting.
pub struct PlannerEventSink {
    bus: Arc<HookBus>,
    meta: EventMeta,
    state: Mutex<SinkState>,
}

impl PlannerEventSink {
    /// A sink publishing with the given meta template.
    pub fn new(bus: Arc<HookBus>, meta: EventMeta) -> Self {
        Self {
            bus,
            meta,
            state: Mutex::new(SinkState {
                ledger: TranscriptLedger::new(),
                usage: TokenUsage::default(),
                hook_err: None,
            }),
        }
    }

    /// A sink whose ledger continues an existing transcript.
    pub fn with_ledger(bus: Arc<HookBus>, meta: EventMeta, ledger: TranscriptLedger) -> Self {
        let sink = Self::new(bus, meta);
        sink.lock().ledger = ledger;
        sink
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Observe one streaming model event.
    pub async fn observe(&self, event: ModelEvent) {
        let hook_event = {
            let mut state = self.lock();
            match &event {
                ModelEvent::Usage(delta) => state.usage.accumulate(delta),
                ModelEvent::MessageComplete(message) => state.ledger.append(message.clone()),
                _ => {}
            }
            if state.hook_err.is_some() {
                return;
            }
            self.as_hook_event(&event)
        };

        if let Some(kind) = hook_event {
            let event = RunEvent::new(self.meta.clone(), kind);
            if let Err(e) = self.bus.publish(event).await {
                warn!(error = %e, "planner sink hook publish failed, muting sink");
                self.lock().hook_err = Some(e);
            }
        }
    }

    fn as_hook_event(&self, event: &ModelEvent) -> Option<EventKind> {
        match event {
            ModelEvent::TextDelta(text) => Some(EventKind::AssistantMessage {
                text: text.clone(),
                streamed: true,
            }),
            ModelEvent::ThinkingDelta { index, delta } => Some(EventKind::ThinkingBlock {
                index: *index,
                text: Some(delta.clone()),
                signature: None,
                redacted: None,
                final_: false,
            }),
            ModelEvent::SignatureDelta { index, delta } => Some(EventKind::ThinkingBlock {
                index: *index,
                text: None,
                signature: Some(delta.clone()),
                redacted: None,
                final_: false,
            }),
            ModelEvent::RedactedThinking { index, data } => Some(EventKind::ThinkingBlock {
                index: *index,
                text: None,
                signature: None,
                redacted: Some(data.clone()),
                final_: false,
            }),
            ModelEvent::ThinkingComplete { index } => Some(EventKind::ThinkingBlock {
                index: *index,
                text: None,
                signature: None,
                redacted: None,
                final_: true,
            }),
            ModelEvent::ToolUseInputDelta { id, delta } => Some(EventKind::ToolCallArgsDelta {
                tool_call_id: ToolCallId::new(id.clone()),
                delta: delta.clone(),
            }),
            ModelEvent::Usage(delta) => Some(EventKind::Usage { usage: *delta }),
            // Tool-use boundaries and the assembled message surface
            // through the plan result, not as chunk events.
            ModelEvent::ToolUseStart { .. } | ModelEvent::MessageComplete(_) => None,
        }
    }

    /// Publish a planner note, unless the sink is muted.
    pub async fn note(&self, code: Option<&str>, text: &str) {
        if self.is_muted() {
            return;
        }
        let event = RunEvent::new(
            self.meta.clone(),
            EventKind::PlannerNote {
                code: code.map(str::to_owned),
                text: text.to_owned(),
            },
        );
        if let Err(e) = self.bus.publish(event).await {
            warn!(error = %e, "planner sink hook publish failed, muting sink");
            self.lock().hook_err = Some(e);
        }
    }

    /// Whether a hook failure has muted this sink.
    pub fn is_muted(&self) -> bool {
        self.lock().hook_err.is_some()
    }

    /// Export the captured transcript and aggregated usage.
    pub fn export(&self) -> (TranscriptLedger, TokenUsage) {
        let state = self.lock();
        (state.ledger.clone(), state.usage)
    }
}
