//! Token estimation and history truncation
//!
//! Estimates use a chars/4 heuristic (rounded up) rather than a tokenizer,
//! so budgets are approximate. Everything here is pure: callers decide what
//! to do with the returned window.

use serde::{Deserialize, Serialize};
use tern_ai::{ContentBlock, Message, MessageContent, ToolSchema};
use thiserror::Error;

/// Fixed framing cost added for each tool_use / tool_result block
pub const TOOL_BLOCK_OVERHEAD: u32 = 10;

/// What to do when history does not fit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextStrategy {
    /// Drop the oldest messages after the first
    #[default]
    Truncate,
    /// Refuse to send
    Error,
}

/// Token budget for one model call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Ceiling on the estimated size of everything sent
    pub max_context_tokens: u32,
    /// Tokens held back for the response
    pub reserved_tokens: u32,
    pub strategy: ContextStrategy,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 100_000,
            reserved_tokens: 4_096,
            strategy: ContextStrategy::Truncate,
        }
    }
}

/// Errors from fitting history into the budget
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// System prompt, tool schemas and the reserve leave no room for messages
    #[error(
        "Context budget exhausted: system prompt and tools use {overhead_tokens} tokens and \
         {reserved_tokens} are reserved, leaving nothing of {max_context_tokens}"
    )]
    BudgetExhausted {
        max_context_tokens: u32,
        overhead_tokens: u32,
        reserved_tokens: u32,
    },

    /// History is over budget and the strategy forbids truncation
    #[error("Context too large: estimated {estimated} tokens, {available} available")]
    Exceeded { estimated: u32, available: u32 },
}

/// Messages to send, and how many were left out
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedContext {
    pub messages: Vec<Message>,
    pub dropped: usize,
}

/// ceil(chars / 4)
pub fn estimate_text_tokens(text: &str) -> u32 {
    chars_to_tokens(text.chars().count())
}

fn chars_to_tokens(chars: usize) -> u32 {
    chars.div_ceil(4).try_into().unwrap_or(u32::MAX)
}

/// Estimate token count for a single message
pub fn estimate_tokens(message: &Message) -> u32 {
    match &message.content {
        MessageContent::Text(text) => estimate_text_tokens(text),
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .map(estimate_block_tokens)
            .fold(0u32, u32::saturating_add),
    }
}

fn estimate_block_tokens(block: &ContentBlock) -> u32 {
    match block {
        ContentBlock::Text { text } => estimate_text_tokens(text),
        ContentBlock::ToolUse { name, input, .. } => {
            let chars = name.chars().count() + input.to_string().chars().count();
            chars_to_tokens(chars).saturating_add(TOOL_BLOCK_OVERHEAD)
        }
        ContentBlock::ToolResult { content, .. } => {
            estimate_text_tokens(content).saturating_add(TOOL_BLOCK_OVERHEAD)
        }
    }
}

/// Estimate total tokens for a slice of messages
pub fn estimate_total_tokens(messages: &[Message]) -> u32 {
    messages
        .iter()
        .map(estimate_tokens)
        .fold(0u32, u32::saturating_add)
}

/// Estimate the fixed cost of the system prompt and tool schemas
pub fn estimate_system_tokens(system_prompt: Option<&str>, tools: &[ToolSchema]) -> u32 {
    let mut chars = system_prompt.map_or(0, |p| p.chars().count());
    if !tools.is_empty() {
        chars += serde_json::to_string(tools)
            .map(|json| json.chars().count())
            .unwrap_or(0);
    }
    chars_to_tokens(chars)
}

/// Fit `messages` into the budget described by `config`.
///
/// Under [`ContextStrategy::Truncate`] the first message is always kept and
/// the rest of the window is the longest run of most recent messages that
/// fits. A leading tool-result message whose tool call fell outside the
/// window is dropped as well.
pub fn manage_context(
    messages: &[Message],
    config: &ContextConfig,
    system_prompt: Option<&str>,
    tools: &[ToolSchema],
) -> Result<ManagedContext, ContextError> {
    let overhead = estimate_system_tokens(system_prompt, tools);
    let available =
        i64::from(config.max_context_tokens) - i64::from(overhead) - i64::from(config.reserved_tokens);

    if available <= 0 {
        return Err(ContextError::BudgetExhausted {
            max_context_tokens: config.max_context_tokens,
            overhead_tokens: overhead,
            reserved_tokens: config.reserved_tokens,
        });
    }
    // 0 < available <= max_context_tokens, so this cannot truncate
    let available = available as u32;

    let total = estimate_total_tokens(messages);
    if total <= available {
        return Ok(ManagedContext {
            messages: messages.to_vec(),
            dropped: 0,
        });
    }

    if config.strategy == ContextStrategy::Error {
        return Err(ContextError::Exceeded {
            estimated: total,
            available,
        });
    }

    // total > available > 0 implies at least one message
    let first = &messages[0];
    let first_tokens = estimate_tokens(first);
    if first_tokens > available {
        tracing::warn!(
            "First message alone ({} tokens) exceeds the {} token budget",
            first_tokens,
            available
        );
        return Ok(ManagedContext {
            messages: vec![first.clone()],
            dropped: messages.len() - 1,
        });
    }

    let mut remaining = available - first_tokens;
    let mut tail_start = messages.len();
    for (idx, message) in messages.iter().enumerate().skip(1).rev() {
        let tokens = estimate_tokens(message);
        if tokens > remaining {
            break;
        }
        remaining -= tokens;
        tail_start = idx;
    }

    if tail_start < messages.len() && messages[tail_start].is_tool_results_only() {
        tail_start += 1;
    }

    let mut kept = Vec::with_capacity(1 + messages.len() - tail_start);
    kept.push(first.clone());
    kept.extend_from_slice(&messages[tail_start..]);

    let dropped = messages.len() - kept.len();
    tracing::debug!(
        "Truncated context: kept {} of {} messages ({} tokens available)",
        kept.len(),
        messages.len(),
        available
    );

    Ok(ManagedContext {
        messages: kept,
        dropped,
    })
}
