//! The in-process hook bus: stamping, suppression, and ordered fan-out.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use axon_types::{HookError, RunId, ToolCallId, TurnId};

use crate::event::RunEvent;

/// Receives every event published on the bus, in publication order.
#[async_trait]
pub trait HookSubscriber: Send + Sync {
    /// Handle one event. Errors are logged by the bus and do not stop
    /// delivery to other subscribers.
    async fn on_event(&self, event: &RunEvent) -> Result<(), HookError>;
}

#[derive(Default)]
struct BusState {
    sequences: HashMap<(RunId, Option<TurnId>), u64>,
    suppressed: HashSet<ToolCallId>,
}

/// The typed, ordered event bus.
///
/// Publication stamps each event with a per-turn monotonic sequence
/// number (starting at 1) and an epoch-ms timestamp, filters suppressed
/// child events, then delivers to subscribers in registration order.
#[derive(Default)]
pub struct HookBus {
    subscribers: RwLock<Vec<Arc<dyn HookSubscriber>>>,
    state: RwLock<BusState>,
}

impl HookBus {
    /// An empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber to the end of the delivery order.
    pub fn subscribe(&self, subscriber: Arc<dyn HookSubscriber>) {
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(subscriber);
    }

    /// Suppress child events attributed to `parent`. While active, no
    /// `ToolCallScheduled` or `ToolResultReceived` carrying that parent
    /// reaches subscribers; everything else flows through untouched.
    pub fn suppress_children(&self, parent: ToolCallId) {
        self.state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .suppressed
            .insert(parent);
    }

    /// Lift a suppression.
    pub fn unsuppress_children(&self, parent: &ToolCallId) {
        self.state
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .suppressed
            .remove(parent);
    }

    /// Publish one event: stamp, filter, deliver.
    pub async fn publish(&self, mut event: RunEvent) -> Result<(), HookError> {
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            if let Some(parent) = event.suppressible_parent() {
                if state.suppressed.contains(parent) {
                    debug!(parent = %parent, "child event suppressed");
                    return Ok(());
                }
            }
            let key = (event.meta.run_id.clone(), event.meta.turn_id.clone());
            let next = state.sequences.entry(key).or_insert(0);
            *next += 1;
            event.meta.sequence = *next;
        }
        if event.meta.timestamp_ms == 0 {
            event.meta.timestamp_ms = Utc::now().timestamp_millis();
        }

        let subscribers: Vec<Arc<dyn HookSubscriber>> = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for subscriber in subscribers {
            if let Err(e) = subscriber.on_event(&event).await {
                // Subscriber failures never fail the run.
                warn!(error = %e, "hook subscriber failed");
            }
        }
        Ok(())
    }
}
