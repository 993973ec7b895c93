//! The persisted run record, upserted idempotently from hook events.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{AgentId, RunId, SessionId, TurnId};

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The run is executing.
    Running,
    /// The run is blocked on a pause or await.
    Paused,
    /// The run finished with a final response.
    Completed,
    /// The run failed.
    Failed,
    /// The run was canceled.
    Canceled,
}

impl RunStatus {
    /// Whether the run can still make progress.
    pub fn is_open(&self) -> bool {
        matches!(self, RunStatus::Running | RunStatus::Paused)
    }
}

/// The run record projected from hook events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// The run's identifier.
    pub run_id: RunId,
    /// The agent driving the run.
    pub agent_id: AgentId,
    /// The session the run belongs to.
    pub session_id: SessionId,
    /// The most recent turn observed.
    pub turn_id: Option<TurnId>,
    /// Current lifecycle status.
    pub status: RunStatus,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the record was last updated.
    pub updated_at: DateTime<Utc>,
    /// Labels accumulated from policy decisions and pause requests.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Metadata accumulated from policy decisions and pause requests.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Error message, for failed runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunRecord {
    /// A fresh `Running` record.
    pub fn started(
        run_id: RunId,
        agent_id: AgentId,
        session_id: SessionId,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id,
            agent_id,
            session_id,
            turn_id: None,
            status: RunStatus::Running,
            started_at: at,
            updated_at: at,
            labels: BTreeMap::new(),
            metadata: BTreeMap::new(),
            error: None,
        }
    }
}
