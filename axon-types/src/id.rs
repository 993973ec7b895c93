//! Typed ID wrappers and the deterministic derivation rules for run,
//! tool-call, and await identifiers.
//!
//! Identifiers are caller-opaque strings. The derivation functions here
//! are pure: given the same inputs they always produce the same output,
//! which is what keeps them stable across workflow replays.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed ID wrappers prevent mixing up run IDs, session IDs, etc.
/// These are just strings underneath — no UUID enforcement, no format
/// requirement. The runtime doesn't care what your IDs look like.
macro_rules! typed_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new typed ID from anything that converts to String.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the inner string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

typed_id!(RunId, "Unique identifier for one execution of an agent.");
typed_id!(AgentId, "Unique identifier for an agent configuration.");
typed_id!(SessionId, "Unique identifier for a conversation session.");
typed_id!(TurnId, "Identifier for one plan/act/observe cycle within a run.");
typed_id!(ToolCallId, "Identifier for a single tool invocation.");
typed_id!(AwaitId, "Identifier for an operator-input barrier in the plan loop.");

/// Separator marking the boundary between a parent run and a nested
/// agent-as-tool run.
const NESTED_SEPARATOR: &str = "/agent/";

/// Placeholder used in derived IDs when no turn is active yet.
const NO_TURN: &str = "no-turn";

/// Placeholder used in await IDs when the await is not tied to a tool call.
const NO_CALL: &str = "no-call";

impl RunId {
    /// Derive the run ID for a nested agent-as-tool invocation:
    /// `<parent>/agent/<tool>`.
    pub fn nested(&self, tool: &str) -> RunId {
        RunId(format!("{}{NESTED_SEPARATOR}{tool}", self.0))
    }

    /// The root run ID: everything before the first `/agent/` segment.
    /// For a non-nested run this is the ID itself.
    pub fn root(&self) -> RunId {
        match self.0.find(NESTED_SEPARATOR) {
            Some(idx) => RunId(self.0[..idx].to_owned()),
            None => self.clone(),
        }
    }

    /// The immediate parent of a nested run: everything before the last
    /// `/agent/` segment. `None` for a non-nested run.
    pub fn parent(&self) -> Option<RunId> {
        self.0
            .rfind(NESTED_SEPARATOR)
            .map(|idx| RunId(self.0[..idx].to_owned()))
    }

    /// Whether this ID names a nested agent-as-tool run.
    pub fn is_nested(&self) -> bool {
        self.0.contains(NESTED_SEPARATOR)
    }
}

impl ToolCallId {
    /// Derive a deterministic tool call ID for the call at `index` within
    /// a turn's batch: `<run>/<turn|"no-turn">/<tool with '.'→'-'>/<index>`.
    ///
    /// Used when the planner did not supply a provider-native call ID.
    /// Because every input is part of the workflow's deterministic state,
    /// replay reproduces the identical ID.
    pub fn derive(run: &RunId, turn: Option<&TurnId>, tool: &str, index: usize) -> ToolCallId {
        let turn = turn.map_or(NO_TURN, TurnId::as_str);
        let tool = tool.replace('.', "-");
        ToolCallId(format!("{run}/{turn}/{tool}/{index}"))
    }
}

impl AwaitId {
    /// Derive a deterministic await ID:
    /// `<run>/<turn|"no-turn">/await/<tool_call|"no-call">`.
    pub fn derive(run: &RunId, turn: Option<&TurnId>, call: Option<&ToolCallId>) -> AwaitId {
        let turn = turn.map_or(NO_TURN, TurnId::as_str);
        let call = call.map_or(NO_CALL, ToolCallId::as_str);
        AwaitId(format!("{run}/{turn}/await/{call}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_and_root_round_trip() {
        let parent = RunId::new("run-7");
        let child = parent.nested("billing.invoices.lookup");
        assert_eq!(child.as_str(), "run-7/agent/billing.invoices.lookup");
        assert_eq!(child.root(), parent);
        assert!(!parent.is_nested());
        assert!(child.is_nested());
    }

    #[test]
    fn root_of_doubly_nested_is_topmost() {
        let root = RunId::new("r");
        let grandchild = root.nested("a.b").nested("c.d");
        assert_eq!(grandchild.root(), root);
    }

    #[test]
    fn tool_call_id_replaces_dots() {
        let id = ToolCallId::derive(
            &RunId::new("r1"),
            Some(&TurnId::new("t2")),
            "svc.ts.tool",
            3,
        );
        assert_eq!(id.as_str(), "r1/t2/svc-ts-tool/3");
    }

    #[test]
    fn tool_call_id_without_turn() {
        let id = ToolCallId::derive(&RunId::new("r1"), None, "x", 0);
        assert_eq!(id.as_str(), "r1/no-turn/x/0");
    }

    #[test]
    fn await_id_placeholders() {
        let run = RunId::new("r1");
        let id = AwaitId::derive(&run, None, None);
        assert_eq!(id.as_str(), "r1/no-turn/await/no-call");

        let call = ToolCallId::derive(&run, Some(&TurnId::new("t1")), "a.b", 0);
        let id = AwaitId::derive(&run, Some(&TurnId::new("t1")), Some(&call));
        assert_eq!(id.as_str(), "r1/t1/await/r1/t1/a-b/0");
    }
}
