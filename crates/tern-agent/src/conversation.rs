//! Conversation state: messages, system prompt, and token counters.

use serde::{Deserialize, Serialize};
use tern_ai::Message;

/// Token counts, accumulated additively across model calls
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    /// Add counts reported by one usage event
    pub fn add(&mut self, input_tokens: u32, output_tokens: u32) {
        self.input_tokens += u64::from(input_tokens);
        self.output_tokens += u64::from(output_tokens);
    }
}

/// Everything needed to resume a conversation.
///
/// Owned by the agent while a turn runs; stored and restored verbatim by
/// whoever persists sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    /// Conversation messages
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Total input tokens across all calls
    #[serde(default)]
    pub input_tokens: u64,
    /// Total output tokens across all calls
    #[serde(default)]
    pub output_tokens: u64,
    /// Number of user turns started
    #[serde(default)]
    pub turn_count: u32,
}

impl ConversationState {
    pub fn new(system_prompt: Option<String>) -> Self {
        Self {
            system_prompt,
            ..Default::default()
        }
    }

    /// Drop messages and counters. The system prompt is kept.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.input_tokens = 0;
        self.output_tokens = 0;
        self.turn_count = 0;
    }

    /// Accumulated usage
    pub fn usage(&self) -> Usage {
        Usage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
        }
    }

    pub(crate) fn add_usage(&mut self, input_tokens: u32, output_tokens: u32) {
        self.input_tokens += u64::from(input_tokens);
        self.output_tokens += u64::from(output_tokens);
    }
}
