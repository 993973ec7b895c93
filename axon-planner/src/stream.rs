//! Streaming model events, as the provider decorator reports them.

use axon_types::{Message, TokenUsage};

/// An incremental event from a streaming model response.
///
/// The sink turns these into hook events and the transcript ledger.
/// Thinking parts are kept out of assistant chunks; tool-argument
/// fragments are best-effort streaming UX — the canonical tool call is
/// always the finalized one on the plan result.
#[derive(Debug, Clone)]
pub enum ModelEvent {
    /// Incremental assistant text.
    TextDelta(String),
    /// Incremental thinking content for the block at `index`.
    ThinkingDelta {
        /// Position of the thinking block in the response.
        index: u32,
        /// The text fragment.
        delta: String,
    },
    /// Signature fragment for the thinking block at `index`.
    SignatureDelta {
        /// Position of the thinking block in the response.
        index: u32,
        /// The signature fragment.
        delta: String,
    },
    /// A redacted thinking block (opaque to the runtime).
    RedactedThinking {
        /// Position of the block in the response.
        index: u32,
        /// The opaque data.
        data: String,
    },
    /// The thinking block at `index` is complete.
    ThinkingComplete {
        /// Position of the block in the response.
        index: u32,
    },
    /// A tool-use block started streaming.
    ToolUseStart {
        /// Provider-native tool call ID.
        id: String,
        /// Tool name.
        name: String,
    },
    /// A fragment of a tool call's JSON arguments.
    ToolUseInputDelta {
        /// Provider-native tool call ID.
        id: String,
        /// The JSON fragment.
        delta: String,
    },
    /// Token usage observed mid-stream or on the final response.
    Usage(TokenUsage),
    /// The fully-assembled assistant message, sent at stream end.
    MessageComplete(Message),
}
