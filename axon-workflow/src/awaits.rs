//! The await coordinator: the service-side surface for operator input.
//!
//! The loop registers what it is blocked on; the `provide_*` APIs
//! validate operator input against that registration and forward it as
//! a control signal. Validation failures are typed so service layers
//! can tell a stale or closed run from a dependency failure.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use axon_types::{
    AwaitError, AwaitId, AwaitResolution, ExternalToolResult, NotAwaitableReason, RunId,
    SignalError, ToolCallId,
};

/// A pause request delivered through the control channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PauseRequest {
    /// Why the run is being paused.
    pub reason: String,
    /// Who requested the pause.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
    /// Labels to record on the run.
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub labels: std::collections::BTreeMap<String, String>,
    /// Metadata to record on the run.
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub metadata: std::collections::BTreeMap<String, serde_json::Value>,
}

/// A resume request delivered through the control channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResumeRequest {
    /// Why the run is resuming.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Everything a run's control channel can carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum ControlSignal {
    /// Pause the run at the next checkpoint.
    Pause(PauseRequest),
    /// Resume a paused run.
    Resume(ResumeRequest),
    /// Resolve the pending await item.
    Await(AwaitResolution),
}

/// What a run is currently blocked on.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingKind {
    /// A free-text clarification.
    Clarification,
    /// Structured questions, answered as a set.
    Questions {
        /// The question IDs an answer set must cover.
        ids: Vec<String>,
    },
    /// Externally-satisfied tool calls.
    ExternalTools {
        /// The awaited call IDs (a multiset — duplicates matter).
        calls: Vec<ToolCallId>,
    },
    /// A tool-call confirmation.
    Confirmation {
        /// The call awaiting a decision.
        tool_call_id: ToolCallId,
    },
}

/// One registered await barrier.
#[derive(Debug, Clone)]
pub struct PendingAwait {
    /// The barrier's ID; `provide_*` calls must target it.
    pub await_id: AwaitId,
    /// What kind of input satisfies it.
    pub kind: PendingKind,
}

/// Sends control signals to a running workflow. Implemented by engines.
#[async_trait]
pub trait ControlSender: Send + Sync {
    /// Deliver a signal to the run's control channel.
    async fn send(&self, run_id: &RunId, signal: ControlSignal) -> Result<(), SignalError>;
}

#[derive(Debug, Default)]
enum RunAwaitState {
    #[default]
    Open,
    Waiting(std::collections::VecDeque<PendingAwait>),
    Completed,
}

/// Tracks which runs exist, which are blocked, and on what.
///
/// The loop registers the whole await queue before announcing it, so an
/// operator reacting to the first await event always finds the barrier
/// registered. Items must be satisfied in declaration order: validation
/// targets the queue's front.
#[derive(Default)]
pub struct AwaitCoordinator {
    runs: RwLock<HashMap<RunId, RunAwaitState>>,
}

impl AwaitCoordinator {
    /// An empty coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_runs<R>(&self, f: impl FnOnce(&mut HashMap<RunId, RunAwaitState>) -> R) -> R {
        let mut runs = self.runs.write().unwrap_or_else(|e| e.into_inner());
        f(&mut runs)
    }

    /// Record that a run started.
    pub fn open_run(&self, run_id: RunId) {
        self.with_runs(|runs| {
            runs.insert(run_id, RunAwaitState::Open);
        });
    }

    /// Record that a run terminated. Later `provide_*` calls get
    /// `completed_run`.
    pub fn close_run(&self, run_id: &RunId) {
        self.with_runs(|runs| {
            if let Some(state) = runs.get_mut(run_id) {
                *state = RunAwaitState::Completed;
            }
        });
    }

    /// Register an ordered await queue the run is about to block on.
    pub fn begin_queue(&self, run_id: &RunId, pending: Vec<PendingAwait>) {
        self.with_runs(|runs| {
            runs.insert(
                run_id.clone(),
                RunAwaitState::Waiting(pending.into()),
            );
        });
    }

    /// Drop the front item after it resolved.
    pub fn advance(&self, run_id: &RunId) {
        self.with_runs(|runs| {
            if let Some(RunAwaitState::Waiting(queue)) = runs.get_mut(run_id) {
                queue.pop_front();
                if queue.is_empty() {
                    runs.insert(run_id.clone(), RunAwaitState::Open);
                }
            }
        });
    }

    /// Clear the whole queue after a timeout or fatal error.
    pub fn end_queue(&self, run_id: &RunId) {
        self.with_runs(|runs| {
            if let Some(state @ RunAwaitState::Waiting(_)) = runs.get_mut(run_id) {
                *state = RunAwaitState::Open;
            }
        });
    }

    /// The front pending await for a run, validated for the `provide_*`
    /// path.
    fn pending_for(&self, run_id: &RunId) -> Result<PendingAwait, AwaitError> {
        let runs = self.runs.read().unwrap_or_else(|e| e.into_inner());
        match runs.get(run_id) {
            None => Err(AwaitError::NotAwaitable {
                run_id: run_id.clone(),
                reason: NotAwaitableReason::UnknownRun,
                cause: None,
            }),
            Some(RunAwaitState::Completed) => Err(AwaitError::NotAwaitable {
                run_id: run_id.clone(),
                reason: NotAwaitableReason::CompletedRun,
                cause: None,
            }),
            Some(RunAwaitState::Open) => Err(AwaitError::NotAwaitable {
                run_id: run_id.clone(),
                reason: NotAwaitableReason::NotWaiting,
                cause: None,
            }),
            Some(RunAwaitState::Waiting(queue)) => match queue.front() {
                Some(pending) => Ok(pending.clone()),
                None => Err(AwaitError::NotAwaitable {
                    run_id: run_id.clone(),
                    reason: NotAwaitableReason::NotWaiting,
                    cause: None,
                }),
            },
        }
    }

    fn check_await_id(pending: &PendingAwait, got: &AwaitId) -> Result<(), AwaitError> {
        if &pending.await_id != got {
            return Err(AwaitError::IdMismatch {
                expected: pending.await_id.clone(),
                got: got.clone(),
            });
        }
        Ok(())
    }

    /// Validate a clarification answer against the pending await.
    pub fn validate_clarification(
        &self,
        run_id: &RunId,
        await_id: &AwaitId,
    ) -> Result<(), AwaitError> {
        let pending = self.pending_for(run_id)?;
        Self::check_await_id(&pending, await_id)?;
        match pending.kind {
            PendingKind::Clarification => Ok(()),
            _ => Err(AwaitError::IdMismatch {
                expected: pending.await_id,
                got: await_id.clone(),
            }),
        }
    }

    /// Validate a confirmation decision against the pending await.
    pub fn validate_confirmation(
        &self,
        run_id: &RunId,
        await_id: &AwaitId,
    ) -> Result<ToolCallId, AwaitError> {
        let pending = self.pending_for(run_id)?;
        Self::check_await_id(&pending, await_id)?;
        match pending.kind {
            PendingKind::Confirmation { tool_call_id } => Ok(tool_call_id),
            _ => Err(AwaitError::IdMismatch {
                expected: pending.await_id,
                got: await_id.clone(),
            }),
        }
    }

    /// Validate an answer set against the pending questions.
    pub fn validate_answers(
        &self,
        run_id: &RunId,
        await_id: &AwaitId,
        answers: &[(String, String)],
    ) -> Result<(), AwaitError> {
        let pending = self.pending_for(run_id)?;
        Self::check_await_id(&pending, await_id)?;
        match &pending.kind {
            PendingKind::Questions { ids } => {
                if answers.is_empty() {
                    return Err(AwaitError::EmptyResults);
                }
                let expected: HashSet<&str> = ids.iter().map(String::as_str).collect();
                for (id, _) in answers {
                    if !expected.contains(id.as_str()) {
                        return Err(AwaitError::UnknownToolCall(ToolCallId::new(id.clone())));
                    }
                }
                Ok(())
            }
            _ => Err(AwaitError::IdMismatch {
                expected: pending.await_id.clone(),
                got: await_id.clone(),
            }),
        }
    }

    /// Validate externally-provided tool results: the provided set of
    /// call IDs must equal the awaited set as a multiset.
    pub fn validate_tool_results(
        &self,
        run_id: &RunId,
        await_id: &AwaitId,
        results: &[ExternalToolResult],
    ) -> Result<(), AwaitError> {
        let pending = self.pending_for(run_id)?;
        Self::check_await_id(&pending, await_id)?;
        let awaited = match &pending.kind {
            PendingKind::ExternalTools { calls } => calls,
            _ => {
                return Err(AwaitError::IdMismatch {
                    expected: pending.await_id.clone(),
                    got: await_id.clone(),
                });
            }
        };
        validate_result_set(awaited, results)
    }
}

/// Multiset equality between awaited call IDs and provided results.
pub fn validate_result_set(
    awaited: &[ToolCallId],
    results: &[ExternalToolResult],
) -> Result<(), AwaitError> {
    if results.is_empty() {
        return Err(AwaitError::EmptyResults);
    }
    let mut remaining: HashMap<&ToolCallId, usize> = HashMap::new();
    for id in awaited {
        *remaining.entry(id).or_insert(0) += 1;
    }
    let mut seen: HashMap<&ToolCallId, usize> = HashMap::new();
    for result in results {
        let awaited_count = remaining.get(&result.tool_call_id).copied().unwrap_or(0);
        if awaited_count == 0 {
            return Err(AwaitError::UnknownToolCall(result.tool_call_id.clone()));
        }
        let count = seen.entry(&result.tool_call_id).or_insert(0);
        *count += 1;
        if *count > awaited_count {
            return Err(AwaitError::DuplicateToolCall(result.tool_call_id.clone()));
        }
    }
    for (id, count) in remaining {
        if seen.get(id).copied().unwrap_or(0) < count {
            return Err(AwaitError::MissingToolCall(id.clone()));
        }
    }
    Ok(())
}
