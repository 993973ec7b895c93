//! Loop state carried across turns.

use std::time::Duration;

use chrono::{DateTime, Utc};

use axon_hooks::EventMeta;
use axon_planner::TranscriptLedger;
use axon_types::{
    CapsState, Message, PlannerNote, Role, TerminationReason, TokenUsage, ToolEvent, TurnId,
};

use crate::input::RunInput;

/// The workflow loop's mutable state. Everything here is derived from
/// deterministic inputs, so replay reconstructs it identically.
pub struct LoopState {
    /// Current caps.
    pub caps: CapsState,
    /// Plan attempt counter, advanced on every plan activity.
    pub attempt: u32,
    /// Tool-turn counter; turn IDs derive from it.
    pub turn_index: u32,
    /// The active turn, once one started.
    pub turn: Option<TurnId>,
    /// Aggregate token usage.
    pub usage: TokenUsage,
    /// The transcript ledger.
    pub ledger: TranscriptLedger,
    /// Every tool event produced so far, in execution order.
    pub tool_events: Vec<ToolEvent>,
    /// Whether any agent-as-tool has executed in this run.
    pub executed_agent_tool: bool,
    /// Why the loop finalized early, once it did.
    pub termination: Option<TerminationReason>,
    /// The hard deadline, shifted right by consumed pauses.
    pub deadline: Option<DateTime<Utc>>,
    /// Finalize-reserve window copied from the policy.
    pub finalize_reserve: Duration,
    /// Planner notes accumulated for the output.
    pub notes: Vec<PlannerNote>,
    /// Assistant text the last plan activity streamed, when any.
    pub streamed_text: Option<String>,
}

impl LoopState {
    /// Initial state for a run starting at `started`.
    pub fn new(input: &RunInput, started: DateTime<Utc>) -> Self {
        let budget_deadline = input
            .time_budget
            .and_then(|budget| chrono::Duration::from_std(budget).ok())
            .map(|budget| started + budget);
        let deadline = match (budget_deadline, input.caps.expires_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            caps: input.caps.clone(),
            attempt: 0,
            turn_index: 0,
            turn: None,
            usage: TokenUsage::default(),
            ledger: TranscriptLedger::seeded(
                input.agent.system_prompt.as_deref(),
                input.messages.clone(),
            ),
            tool_events: Vec::new(),
            executed_agent_tool: false,
            termination: None,
            deadline,
            finalize_reserve: input.policy.finalize_reserve,
            notes: Vec::new(),
            streamed_text: None,
        }
    }

    /// Begin the next turn; the ID is a pure function of the counter.
    pub fn next_turn(&mut self) -> TurnId {
        let turn = TurnId::new(format!("turn-{}", self.turn_index));
        self.turn_index += 1;
        self.turn = Some(turn.clone());
        turn
    }

    /// Event meta for the current position in the run.
    pub fn meta(&self, input: &RunInput) -> EventMeta {
        let mut meta = EventMeta::new(
            input.run_id.clone(),
            input.agent.agent_id.clone(),
            input.session_id.clone(),
        );
        meta.turn_id = self.turn.clone();
        meta
    }

    /// Whether the soft deadline (hard deadline minus the finalize
    /// reserve) has passed.
    pub fn soft_deadline_passed(&self, now: DateTime<Utc>) -> bool {
        let Some(deadline) = self.deadline else {
            return false;
        };
        let reserve = chrono::Duration::from_std(self.finalize_reserve)
            .unwrap_or_else(|_| chrono::Duration::zero());
        now >= deadline - reserve
    }

    /// Time left for an await, derived from the hard deadline. `None`
    /// means wait without bound.
    pub fn remaining_await(&self, now: DateTime<Utc>) -> Option<Duration> {
        let deadline = self.deadline?;
        let reserve = chrono::Duration::from_std(self.finalize_reserve)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let remaining = deadline - reserve - now;
        Some(remaining.to_std().unwrap_or(Duration::ZERO))
    }

    /// Shift the deadline right after a consumed pause — paused time
    /// does not count against the await budget.
    pub fn credit_pause(&mut self, paused_for: chrono::Duration) {
        if let Some(deadline) = self.deadline {
            self.deadline = Some(deadline + paused_for);
        }
    }

    /// Append a user-role message to the ledger.
    pub fn append_user_text(&mut self, text: impl Into<String>) {
        self.ledger.append(Message::text(Role::User, text));
    }
}
