//! Projection of hook events into run records.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use axon_types::{HookError, RunRecord, RunStatus};

use crate::bus::HookSubscriber;
use crate::event::{CompletionStatus, EventKind, RunEvent};
use crate::store::RunStore;

/// Projects events into an idempotent [`RunStore`].
///
/// Every event is handled load-then-upsert, so duplicate delivery from
/// activity retries converges on the same record.
pub struct RunStoreProjector {
    store: Arc<dyn RunStore>,
}

impl RunStoreProjector {
    /// A projector writing to `store`.
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }

    fn event_time(event: &RunEvent) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(event.meta.timestamp_ms)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

#[async_trait]
impl HookSubscriber for RunStoreProjector {
    async fn on_event(&self, event: &RunEvent) -> Result<(), HookError> {
        let at = Self::event_time(event);
        let existing = self
            .store
            .load(&event.meta.run_id)
            .await
            .map_err(|e| HookError::Subscriber(e.to_string()))?;

        let mut record = existing.unwrap_or_else(|| {
            RunRecord::started(
                event.meta.run_id.clone(),
                event.meta.agent_id.clone(),
                event.meta.session_id.clone(),
                at,
            )
        });
        record.updated_at = at;
        if event.meta.turn_id.is_some() {
            record.turn_id = event.meta.turn_id.clone();
        }

        match &event.kind {
            EventKind::RunStarted { labels } => {
                record.labels.extend(labels.clone());
            }
            EventKind::RunPaused {
                labels, metadata, ..
            } => {
                record.status = RunStatus::Paused;
                record.labels.extend(labels.clone());
                record.metadata.extend(metadata.clone());
            }
            EventKind::RunResumed { .. } => {
                if record.status == RunStatus::Paused {
                    record.status = RunStatus::Running;
                }
            }
            EventKind::RunCompleted { status, error, .. } => {
                record.status = match status {
                    CompletionStatus::Success => RunStatus::Completed,
                    CompletionStatus::Failed => RunStatus::Failed,
                    CompletionStatus::Canceled => RunStatus::Canceled,
                };
                record.error = error.clone();
            }
            EventKind::PolicyDecision {
                labels, metadata, ..
            } => {
                record.labels.extend(labels.clone());
                record.metadata.extend(metadata.clone());
            }
            // Everything else only refreshes turn tracking and
            // updated_at, handled above.
            _ => {}
        }

        self.store
            .upsert(record)
            .await
            .map_err(|e| HookError::Subscriber(e.to_string()))
    }
}
