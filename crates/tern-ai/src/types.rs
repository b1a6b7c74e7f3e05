//! Core types for LLM interactions

use serde::{Deserialize, Serialize};

/// Message roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Get the role as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One typed unit of message content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text
    Text { text: String },
    /// A tool invocation requested by the model
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// The outcome of a tool invocation, sent back as user content
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

impl ContentBlock {
    /// Create a text block
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a tool use block
    pub fn tool_use(
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    /// Create a tool result block
    pub fn tool_result(
        tool_use_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error,
        }
    }

    /// Get text if this is a text block
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Check if this is a tool use block
    pub fn is_tool_use(&self) -> bool {
        matches!(self, Self::ToolUse { .. })
    }

    /// Check if this is a tool result block
    pub fn is_tool_result(&self) -> bool {
        matches!(self, Self::ToolResult { .. })
    }
}

/// Message content: either a plain string or an ordered list of blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<ContentBlock>> for MessageContent {
    fn from(blocks: Vec<ContentBlock>) -> Self {
        Self::Blocks(blocks)
    }
}

/// A single conversation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    /// Create a user message with text content
    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Content as blocks. Plain text becomes a single text block.
    pub fn blocks(&self) -> Vec<ContentBlock> {
        match &self.content {
            MessageContent::Text(text) => vec![ContentBlock::text(text.clone())],
            MessageContent::Blocks(blocks) => blocks.clone(),
        }
    }

    /// Extract all tool uses as `(id, name, input)`
    pub fn tool_uses(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        match &self.content {
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse { id, name, input } => {
                        Some((id.as_str(), name.as_str(), input))
                    }
                    _ => None,
                })
                .collect(),
            MessageContent::Text(_) => vec![],
        }
    }

    /// Whether every block is a tool result (and there is at least one)
    pub fn is_tool_results_only(&self) -> bool {
        match &self.content {
            MessageContent::Blocks(blocks) => {
                !blocks.is_empty() && blocks.iter().all(ContentBlock::is_tool_result)
            }
            MessageContent::Text(_) => false,
        }
    }

    /// Get combined text content
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| b.as_text())
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// Reason why generation stopped, normalized across backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of response
    EndTurn,
    /// Tool use requested
    ToolUse,
    /// Maximum tokens reached
    MaxTokens,
}

impl StopReason {
    /// Get the normalized spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::EndTurn => "end_turn",
            StopReason::ToolUse => "tool_use",
            StopReason::MaxTokens => "max_tokens",
        }
    }
}

/// Wire-safe tool description sent to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool name (used in API calls)
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON Schema for the tool input
    pub input_schema: serde_json::Value,
}

impl ToolSchema {
    /// Create a new tool schema
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// Request options shared by every provider
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Model identifier (e.g., "claude-sonnet-4-5-20250929")
    pub model: String,
    /// API key, passed through verbatim
    pub api_key: Option<String>,
    /// Base URL override; the provider default is used when unset
    pub base_url: Option<String>,
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Temperature (0.0 - 2.0)
    pub temperature: Option<f32>,
}

impl ProviderConfig {
    /// Create a config for a model with default limits
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: None,
            base_url: None,
            max_tokens: 8192,
            temperature: None,
        }
    }

    /// Set the API key
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Resolve the base URL against a provider default, without a trailing slash
    pub fn base_url_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.base_url
            .as_deref()
            .unwrap_or(default)
            .trim_end_matches('/')
    }
}

/// Everything one model call needs
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub config: ProviderConfig,
    pub messages: Vec<Message>,
    pub system_prompt: Option<String>,
    pub tools: Vec<ToolSchema>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_message_serializes_as_string() {
        let msg = Message::user("hello");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"role": "user", "content": "hello"}));
    }

    #[test]
    fn test_block_tags() {
        let msg = Message::assistant(vec![
            ContentBlock::text("reading"),
            ContentBlock::tool_use("t1", "read_file", json!({"path": "a.txt"})),
        ]);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["content"][1]["type"], "tool_use");
        assert_eq!(value["content"][1]["input"]["path"], "a.txt");
    }

    #[test]
    fn test_tool_result_omits_false_error_flag() {
        let ok = serde_json::to_value(ContentBlock::tool_result("t1", "done", false)).unwrap();
        assert!(ok.get("is_error").is_none());

        let failed = serde_json::to_value(ContentBlock::tool_result("t1", "boom", true)).unwrap();
        assert_eq!(failed["is_error"], true);
    }

    #[test]
    fn test_deserialize_mixed_content() {
        let raw = r#"[
            {"role": "user", "content": "hi"},
            {"role": "user", "content": [{"type": "tool_result", "tool_use_id": "t1", "content": "ok"}]}
        ]"#;
        let messages: Vec<Message> = serde_json::from_str(raw).unwrap();
        assert_eq!(messages[0].content, MessageContent::Text("hi".into()));
        assert!(messages[1].is_tool_results_only());
        assert_eq!(
            messages[1].blocks(),
            vec![ContentBlock::tool_result("t1", "ok", false)]
        );
    }

    #[test]
    fn test_tool_uses_in_order() {
        let msg = Message::assistant(vec![
            ContentBlock::tool_use("a", "one", json!({})),
            ContentBlock::text("between"),
            ContentBlock::tool_use("b", "two", json!({"x": 1})),
        ]);
        let ids: Vec<&str> = msg.tool_uses().iter().map(|(id, _, _)| *id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(msg.text(), "between");
    }

    #[test]
    fn test_base_url_or() {
        let config = ProviderConfig::new("m");
        assert_eq!(config.base_url_or("https://api.example.com"), "https://api.example.com");

        let config = config.with_base_url("http://localhost:8080/");
        assert_eq!(config.base_url_or("https://api.example.com"), "http://localhost:8080");
    }
}
