//! Token usage accounting.

use serde::{Deserialize, Serialize};

/// Token usage for one model invocation or an aggregate over several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt.
    #[serde(default)]
    pub input_tokens: u64,
    /// Tokens generated.
    #[serde(default)]
    pub output_tokens: u64,
    /// Tokens served from prompt cache, when the provider reports them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    /// Tokens written to prompt cache, when the provider reports them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_tokens: Option<u64>,
}

impl TokenUsage {
    /// Accumulate a delta into this total. Saturating; optional fields
    /// materialize on first observation.
    pub fn accumulate(&mut self, delta: &TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(delta.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(delta.output_tokens);
        if let Some(read) = delta.cache_read_tokens {
            *self.cache_read_tokens.get_or_insert(0) += read;
        }
        if let Some(created) = delta.cache_creation_tokens {
            *self.cache_creation_tokens.get_or_insert(0) += created;
        }
    }

    /// Total tokens in and out.
    pub fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}
