//! Run policy and the runtime policy hook.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use axon_types::{AgentId, CapsPatch, CapsState, PolicyError, RunId, TurnId};

/// What the loop does when a turn produced at least one
/// `missing_fields` retry hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingFieldsPolicy {
    /// Ask the planner to wrap up.
    Finalize,
    /// Publish an `AwaitClarification` and block for an operator answer.
    AwaitClarification,
    /// Let the planner retry on the next resume.
    #[default]
    Resume,
}

/// Per-run policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPolicy {
    /// Missing-fields handling.
    #[serde(default)]
    pub on_missing_fields: MissingFieldsPolicy,
    /// Restrict the run to a single tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restrict_to_tool: Option<String>,
    /// Only tools carrying at least one of these tags may run.
    /// Empty means no restriction.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_tags: Vec<String>,
    /// Tools carrying any of these tags may not run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny_tags: Vec<String>,
    /// Cap on tool calls per turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_turn_max_tool_calls: Option<usize>,
    /// Tools forced through confirmation even without a spec-level gate.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub confirm_tools: Vec<String>,
    /// Once any agent-as-tool has executed, a batch with at least this
    /// many failing calls terminates the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hard_protection_threshold: Option<u32>,
    /// Window reserved before the hard deadline for graceful
    /// finalization.
    #[serde(default = "default_finalize_reserve")]
    pub finalize_reserve: Duration,
}

fn default_finalize_reserve() -> Duration {
    Duration::from_secs(30)
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            on_missing_fields: MissingFieldsPolicy::default(),
            restrict_to_tool: None,
            allow_tags: Vec::new(),
            deny_tags: Vec::new(),
            per_turn_max_tool_calls: None,
            confirm_tools: Vec::new(),
            hard_protection_threshold: None,
            finalize_reserve: default_finalize_reserve(),
        }
    }
}

impl RunPolicy {
    /// Whether `tool` (with its `tags`) survives the restriction and tag
    /// filters.
    pub fn allows(&self, tool: &str, tags: &[String]) -> bool {
        if let Some(only) = &self.restrict_to_tool {
            if only != tool {
                return false;
            }
        }
        if self.deny_tags.iter().any(|deny| tags.contains(deny)) {
            return false;
        }
        if !self.allow_tags.is_empty()
            && !self.allow_tags.iter().any(|allow| tags.contains(allow))
        {
            return false;
        }
        true
    }

    /// Whether `tool` requires confirmation by runtime override.
    pub fn forces_confirmation(&self, tool: &str) -> bool {
        self.confirm_tools.iter().any(|t| t == tool)
    }
}

/// What the runtime policy sees before each tool turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyInput {
    /// The run being decided.
    pub run_id: RunId,
    /// The agent driving the run.
    pub agent_id: AgentId,
    /// The current turn.
    pub turn_id: TurnId,
    /// Plan attempt counter.
    pub attempt: u32,
    /// Tools the planner asked for this turn.
    pub candidate_tools: Vec<String>,
    /// Current caps.
    pub caps: CapsState,
}

/// A runtime policy's decision for one turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyDecision {
    /// Tools allowed this turn. `None` leaves the candidates untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    /// Cap overrides. Non-zero fields replace; remaining counts never go
    /// negative.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caps: Option<CapsPatch>,
    /// Labels to attach to the run record.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Metadata to attach to the run record.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Fail the run with `tool execution disabled by policy`.
    #[serde(default)]
    pub disable_tools: bool,
}

/// A pluggable policy consulted before every tool turn.
#[async_trait]
pub trait RuntimePolicy: Send + Sync {
    /// Decide this turn.
    async fn decide(&self, input: PolicyInput) -> Result<PolicyDecision, PolicyError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_owned()).collect()
    }

    #[test]
    fn restrict_to_tool_excludes_everything_else() {
        let policy = RunPolicy {
            restrict_to_tool: Some("svc.ts.only".into()),
            ..Default::default()
        };
        assert!(policy.allows("svc.ts.only", &[]));
        assert!(!policy.allows("svc.ts.other", &[]));
    }

    #[test]
    fn deny_tags_win_over_allow_tags() {
        let policy = RunPolicy {
            allow_tags: tags(&["read"]),
            deny_tags: tags(&["dangerous"]),
            ..Default::default()
        };
        assert!(policy.allows("a", &tags(&["read"])));
        assert!(!policy.allows("b", &tags(&["read", "dangerous"])));
        assert!(!policy.allows("c", &tags(&["write"])));
    }

    #[test]
    fn empty_allow_list_means_no_restriction() {
        let policy = RunPolicy::default();
        assert!(policy.allows("anything", &[]));
    }
}
