//! Caller hooks invoked during a turn

use async_trait::async_trait;

/// Observers and the confirmation gate for one turn.
///
/// Every method has a default, so callers override only what they need.
/// Without an override `confirm_tool` approves everything.
#[async_trait]
pub trait AgentCallbacks: Send + Sync {
    /// Streamed assistant text, in arrival order
    async fn on_text(&self, _text: &str) {}

    /// A tool call is about to be handled
    async fn on_tool_call(&self, _name: &str, _input: &serde_json::Value) {}

    /// A tool call produced its result
    async fn on_tool_result(&self, _name: &str, _result: &str, _is_error: bool) {}

    /// Older messages were left out to fit the token budget
    async fn on_context_truncation(&self, _dropped: usize) {}

    /// Approve a dangerous tool call
    async fn confirm_tool(&self, _name: &str, _input: &serde_json::Value) -> bool {
        true
    }
}

/// Callbacks that observe nothing and approve everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCallbacks;

#[async_trait]
impl AgentCallbacks for NoopCallbacks {}
