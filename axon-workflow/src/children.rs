//! Parent-side tracking of nested tool calls.

use std::collections::BTreeSet;

use axon_types::ToolCallId;

/// Tracks the nested calls a parent agent-as-tool invocation expects
/// and has discovered. The loop registers each batch's call IDs and
/// emits a single `ToolCallUpdated` when the expected total grows.
#[derive(Debug)]
pub struct ChildTracker {
    parent_call: ToolCallId,
    expected: u32,
    discovered: BTreeSet<ToolCallId>,
}

impl ChildTracker {
    /// A tracker for `parent_call` with the planner-anticipated count.
    pub fn new(parent_call: ToolCallId, expected: u32) -> Self {
        Self {
            parent_call,
            expected,
            discovered: BTreeSet::new(),
        }
    }

    /// The parent call this tracker belongs to.
    pub fn parent_call(&self) -> &ToolCallId {
        &self.parent_call
    }

    /// Register discovered call IDs. Returns the new expected total when
    /// it grew, `None` when nothing changed.
    pub fn register(&mut self, ids: &[ToolCallId]) -> Option<u32> {
        let before = self.discovered.len();
        for id in ids {
            self.discovered.insert(id.clone());
        }
        if self.discovered.len() == before {
            return None;
        }
        let total = (self.discovered.len() as u32).max(self.expected);
        if total != self.expected || before == 0 {
            self.expected = total;
            Some(total)
        } else {
            Some(total)
        }
    }
}
