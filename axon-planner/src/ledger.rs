//! The transcript ledger: the ordered, provider-visible conversation.

use axon_types::{ContentBlock, Message, Role};

/// Ordered stream of provider-visible messages, rebuilt for every plan
/// activity.
///
/// The ledger owns the one ordering invariant the provider cares about:
/// `tool_use` turns are recorded before their matching `tool_result`
/// blocks, so provider tool correlation survives rehydration.
#[derive(Debug, Clone, Default)]
pub struct TranscriptLedger {
    messages: Vec<Message>,
}

impl TranscriptLedger {
    /// An empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// A ledger seeded with an optional system prompt and the caller's
    /// opening messages.
    pub fn seeded(system_prompt: Option<&str>, opening: Vec<Message>) -> Self {
        let mut messages = Vec::with_capacity(opening.len() + 1);
        if let Some(prompt) = system_prompt {
            messages.push(Message::text(Role::System, prompt));
        }
        messages.extend(opening);
        Self { messages }
    }

    /// Append a complete message.
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Append assistant text.
    pub fn append_assistant_text(&mut self, text: impl Into<String>) {
        self.messages.push(Message::text(Role::Assistant, text));
    }

    /// Record the planner's tool calls as one assistant message of
    /// `tool_use` blocks. Must precede the matching results.
    pub fn append_tool_uses(&mut self, calls: &[(String, String, serde_json::Value)]) {
        if calls.is_empty() {
            return;
        }
        let content = calls
            .iter()
            .map(|(id, name, input)| ContentBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            })
            .collect();
        self.messages.push(Message {
            role: Role::Assistant,
            content,
        });
    }

    /// Record tool results as one user message of `tool_result` blocks.
    pub fn append_tool_results(&mut self, results: &[(String, serde_json::Value, bool)]) {
        if results.is_empty() {
            return;
        }
        let content = results
            .iter()
            .map(|(id, content, is_error)| ContentBlock::ToolResult {
                tool_use_id: id.clone(),
                content: content.clone(),
                is_error: *is_error,
            })
            .collect();
        self.messages.push(Message {
            role: Role::User,
            content,
        });
    }

    /// Append a system-role reminder. Reminders instruct the planner and
    /// are not for end-user display.
    pub fn append_reminder(&mut self, text: impl Into<String>) {
        self.messages.push(Message::text(Role::System, text));
    }

    /// The text of the last assistant message, for recovering a streamed
    /// final response whose body arrived empty.
    pub fn recover_final_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && !m.joined_text().is_empty())
            .map(Message::joined_text)
    }

    /// The current messages.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Consume the ledger into its messages.
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// IDs of `tool_use` blocks that have no matching `tool_result` yet.
    /// Used by tests to assert correlation integrity.
    pub fn unresolved_tool_uses(&self) -> Vec<String> {
        let mut open = Vec::new();
        for message in &self.messages {
            for block in &message.content {
                match block {
                    ContentBlock::ToolUse { id, .. } => open.push(id.clone()),
                    ContentBlock::ToolResult { tool_use_id, .. } => {
                        open.retain(|id| id != tool_use_id);
                    }
                    _ => {}
                }
            }
        }
        open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_uses_precede_results() {
        let mut ledger = TranscriptLedger::new();
        ledger.append_tool_uses(&[("c1".into(), "svc.ts.x".into(), json!({}))]);
        ledger.append_tool_results(&[("c1".into(), json!({"ok": true}), false)]);

        let messages = ledger.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].has_tool_use());
        assert!(messages[1].has_tool_result());
        assert!(ledger.unresolved_tool_uses().is_empty());
    }

    #[test]
    fn recover_final_text_skips_tool_messages() {
        let mut ledger = TranscriptLedger::new();
        ledger.append_assistant_text("the answer");
        ledger.append_tool_uses(&[("c1".into(), "svc.ts.x".into(), json!({}))]);
        assert_eq!(ledger.recover_final_text().as_deref(), Some("the answer"));
    }

    #[test]
    fn seeded_puts_system_prompt_first() {
        let ledger = TranscriptLedger::seeded(
            Some("be brief"),
            vec![Message::text(Role::User, "hi")],
        );
        assert_eq!(ledger.messages()[0].role, Role::System);
        assert_eq!(ledger.messages()[1].role, Role::User);
    }
}
