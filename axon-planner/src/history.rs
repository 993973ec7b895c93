//! History compression: rewrites the message list before planning while
//! preserving system messages, turn boundaries, and tool correlation.

use async_trait::async_trait;

use axon_types::{Message, PlanError, Role};

/// Produces a summary of dropped conversation history.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize `messages` into a single text.
    async fn summarize(&self, messages: &[Message]) -> Result<String, PlanError>;
}

/// How the message list is rewritten before each plan activity.
#[derive(Debug, Clone, Copy, Default)]
pub enum HistoryPolicy {
    /// No rewriting.
    #[default]
    KeepAll,
    /// Keep the system prefix plus the most recent `n` turn groups.
    KeepRecentTurns(usize),
    /// Fold everything older than the most recent `keep_recent` turn
    /// groups into one summary message.
    Compress {
        /// Turn groups kept verbatim.
        keep_recent: usize,
    },
}

impl HistoryPolicy {
    /// Apply this policy. `Compress` requires a summarizer; without one
    /// it degrades to `KeepRecentTurns`.
    pub async fn apply(
        &self,
        messages: Vec<Message>,
        summarizer: Option<&dyn Summarizer>,
    ) -> Result<Vec<Message>, PlanError> {
        match self {
            HistoryPolicy::KeepAll => Ok(messages),
            HistoryPolicy::KeepRecentTurns(n) => Ok(keep_recent(messages, *n).1),
            HistoryPolicy::Compress { keep_recent: n } => {
                let (dropped, kept) = keep_recent(messages, *n);
                if dropped.is_empty() {
                    return Ok(kept);
                }
                let Some(summarizer) = summarizer else {
                    return Ok(kept);
                };
                let summary = summarizer.summarize(&dropped).await?;
                let mut out = Vec::with_capacity(kept.len() + 1);
                let system_end = kept
                    .iter()
                    .take_while(|m| m.role == Role::System)
                    .count();
                out.extend_from_slice(&kept[..system_end]);
                out.push(Message::text(
                    Role::System,
                    format!("Summary of earlier conversation: {summary}"),
                ));
                out.extend_from_slice(&kept[system_end..]);
                Ok(out)
            }
        }
    }
}

/// Split `messages` into (dropped, kept) where kept holds the leading
/// system prefix plus the last `n` turn groups. A turn group starts at
/// a user message that carries no tool results — tool-result messages
/// belong to the turn of the tool_use that produced them, so pairs are
/// never split.
fn keep_recent(messages: Vec<Message>, n: usize) -> (Vec<Message>, Vec<Message>) {
    let system_end = messages
        .iter()
        .take_while(|m| m.role == Role::System)
        .count();

    let mut boundaries: Vec<usize> = messages
        .iter()
        .enumerate()
        .skip(system_end)
        .filter(|(_, m)| m.role == Role::User && !m.has_tool_result())
        .map(|(i, _)| i)
        .collect();

    if boundaries.len() <= n {
        return (Vec::new(), messages);
    }
    let cut = boundaries.split_off(boundaries.len() - n)[0];

    let mut kept: Vec<Message> = messages[..system_end].to_vec();
    kept.extend_from_slice(&messages[cut..]);
    let dropped = messages[system_end..cut].to_vec();
    (dropped, kept)
}
