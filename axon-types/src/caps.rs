//! Run caps: numeric budgets enforced per run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Numeric budgets for a run. Zero means unlimited.
///
/// `remaining_*` counters decrement as tools execute and failures are
/// observed; they never go below zero. The consecutive-failure counter
/// resets to its maximum on any fully-successful turn.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapsState {
    /// Maximum tool calls for the run. Zero = unlimited.
    #[serde(default)]
    pub max_tool_calls: u32,
    /// Tool calls left before the cap trips.
    #[serde(default)]
    pub remaining_tool_calls: u32,
    /// Maximum consecutive turns with failed tool calls. Zero = unlimited.
    #[serde(default)]
    pub max_consecutive_failed_tool_calls: u32,
    /// Failing turns left before the cap trips.
    #[serde(default)]
    pub remaining_consecutive_failed_tool_calls: u32,
    /// Hard deadline for the run, when one is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Non-zero cap fields a policy decision wants to override.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapsPatch {
    /// Override for `max_tool_calls`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tool_calls: Option<u32>,
    /// Override for `max_consecutive_failed_tool_calls`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_consecutive_failed_tool_calls: Option<u32>,
    /// Override for the run deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CapsState {
    /// Caps with the given tool-call and failure budgets. Remaining
    /// counters start at their maxima.
    pub fn new(max_tool_calls: u32, max_consecutive_failed: u32) -> Self {
        Self {
            max_tool_calls,
            remaining_tool_calls: max_tool_calls,
            max_consecutive_failed_tool_calls: max_consecutive_failed,
            remaining_consecutive_failed_tool_calls: max_consecutive_failed,
            expires_at: None,
        }
    }

    /// Unlimited caps.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Whether tool calls are capped at all.
    pub fn tool_calls_limited(&self) -> bool {
        self.max_tool_calls > 0
    }

    /// Whether the tool-call budget is spent.
    pub fn tool_calls_exhausted(&self) -> bool {
        self.tool_calls_limited() && self.remaining_tool_calls == 0
    }

    /// Whether the consecutive-failure budget is spent.
    pub fn failures_exhausted(&self) -> bool {
        self.max_consecutive_failed_tool_calls > 0
            && self.remaining_consecutive_failed_tool_calls == 0
    }

    /// Whether the deadline has passed as of `now`.
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// How many of `requested` calls the budget still allows.
    /// Unlimited caps allow everything.
    pub fn allow(&self, requested: usize) -> usize {
        if self.tool_calls_limited() {
            requested.min(self.remaining_tool_calls as usize)
        } else {
            requested
        }
    }

    /// Charge `executed` tool calls against the budget, clamped at zero.
    pub fn charge_tools(&mut self, executed: u32) {
        if self.tool_calls_limited() {
            self.remaining_tool_calls = self.remaining_tool_calls.saturating_sub(executed);
        }
    }

    /// Record the failure count of a completed turn. A turn with zero
    /// failures resets the consecutive-failure budget to its maximum;
    /// otherwise the budget decrements by the failure count, clamped at
    /// zero.
    pub fn observe_turn_failures(&mut self, failed: u32) {
        if self.max_consecutive_failed_tool_calls == 0 {
            return;
        }
        if failed == 0 {
            self.remaining_consecutive_failed_tool_calls =
                self.max_consecutive_failed_tool_calls;
        } else {
            self.remaining_consecutive_failed_tool_calls = self
                .remaining_consecutive_failed_tool_calls
                .saturating_sub(failed);
        }
    }

    /// Merge a policy decision's cap overrides. Non-zero fields of the
    /// patch replace the maxima; remaining counters are re-clamped so
    /// they never exceed the new maximum and never go negative.
    pub fn merge(&mut self, patch: &CapsPatch) {
        if let Some(max) = patch.max_tool_calls {
            let spent = self.max_tool_calls.saturating_sub(self.remaining_tool_calls);
            self.max_tool_calls = max;
            self.remaining_tool_calls = max.saturating_sub(spent);
        }
        if let Some(max) = patch.max_consecutive_failed_tool_calls {
            let spent = self
                .max_consecutive_failed_tool_calls
                .saturating_sub(self.remaining_consecutive_failed_tool_calls);
            self.max_consecutive_failed_tool_calls = max;
            self.remaining_consecutive_failed_tool_calls = max.saturating_sub(spent);
        }
        if let Some(at) = patch.expires_at {
            self.expires_at = Some(at);
        }
    }
}
