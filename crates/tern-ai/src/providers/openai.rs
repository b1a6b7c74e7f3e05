//! OpenAI-compatible Chat Completions provider (delta-chunk stream)
//!
//! The same wire format is served by OpenAI, Groq, OpenRouter and Ollama, so
//! one adapter covers all of them and only the base URL and key variable vary.

use serde::{Deserialize, Serialize};

use super::{Provider, WireParser, drive, resolve_api_key};
use crate::{
    error::Result,
    stream::{StreamEvent, StreamEventStream, ToolCallAccumulator},
    types::{ContentBlock, Message, MessageContent, ProviderRequest, Role, StopReason, ToolSchema},
};

/// Client for any backend speaking the Chat Completions protocol
pub struct OpenAIProvider {
    client: reqwest::Client,
    name: String,
    base_url: String,
    env_var: Option<String>,
}

impl OpenAIProvider {
    /// Create a provider for an arbitrary compatible endpoint
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        env_var: Option<&str>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            name: name.into(),
            base_url: base_url.into(),
            env_var: env_var.map(str::to_string),
        }
    }

    pub fn openai() -> Self {
        Self::new("openai", "https://api.openai.com/v1", Some("OPENAI_API_KEY"))
    }

    pub fn groq() -> Self {
        Self::new("groq", "https://api.groq.com/openai/v1", Some("GROQ_API_KEY"))
    }

    pub fn openrouter() -> Self {
        Self::new(
            "openrouter",
            "https://openrouter.ai/api/v1",
            Some("OPENROUTER_API_KEY"),
        )
    }

    /// Local Ollama server; no key required
    pub fn ollama() -> Self {
        Self::new("ollama", "http://localhost:11434/v1", None)
    }

    fn build_http_request(&self, request: &ProviderRequest) -> Result<reqwest::RequestBuilder> {
        let body = serde_json::to_vec(&build_request(request))?;
        let url = format!(
            "{}/chat/completions",
            request.config.base_url_or(&self.base_url)
        );

        tracing::debug!("{} API URL: {}", self.name, url);

        let mut builder = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .header("accept", "text/event-stream")
            .body(body);

        if let Some(key) = resolve_api_key(&request.config, self) {
            builder = builder.bearer_auth(key);
        }

        Ok(builder)
    }
}

impl Provider for OpenAIProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_base_url(&self) -> &str {
        &self.base_url
    }

    fn api_key_env_var(&self) -> Option<&str> {
        self.env_var.as_deref()
    }

    fn send(&self, request: ProviderRequest) -> StreamEventStream {
        drive(self.build_http_request(&request), OpenAIStreamParser::new())
    }
}

// ============================================================================
// Stream parsing
// ============================================================================

/// Decoder for delta chunks.
///
/// Tool calls are addressed by integer index and keep accumulating until a
/// chunk carries a `finish_reason`, which completes every pending call in
/// index order before the `Stop` event.
#[derive(Debug, Default)]
pub struct OpenAIStreamParser {
    tool_calls: ToolCallAccumulator,
    usage_emitted: bool,
}

impl OpenAIStreamParser {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WireParser for OpenAIStreamParser {
    fn feed(&mut self, _event: &str, data: &str) -> Vec<StreamEvent> {
        let chunk = match serde_json::from_str::<StreamChunk>(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!("Skipping undecodable chunk: {}", e);
                return vec![];
            }
        };

        if let Some(error) = chunk.error {
            return vec![StreamEvent::Error {
                message: error.message,
            }];
        }

        let mut events = Vec::new();

        for choice in chunk.choices {
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                events.push(StreamEvent::Text { text });
            }

            for call in choice.delta.tool_calls.unwrap_or_default() {
                let (name, arguments) = match call.function {
                    Some(f) => (f.name, f.arguments),
                    None => (None, None),
                };
                self.tool_calls
                    .merge(call.index, call.id.as_deref(), name.as_deref());
                if let Some(fragment) = arguments {
                    self.tool_calls.push_fragment_or_insert(call.index, &fragment);
                }
            }

            if let Some(reason) = choice.finish_reason {
                let completed = self.tool_calls.complete_all();
                let mut reason = map_stop_reason(&reason);
                // Some servers finish with "stop" even when they called tools
                if !completed.is_empty() && reason == StopReason::EndTurn {
                    reason = StopReason::ToolUse;
                }
                events.extend(completed);
                events.push(StreamEvent::Stop { reason });
            }
        }

        if let Some(usage) = chunk.usage {
            if self.usage_emitted {
                tracing::debug!("Ignoring repeated usage report");
            } else {
                self.usage_emitted = true;
                events.push(StreamEvent::Usage {
                    input_tokens: usage.prompt_tokens,
                    output_tokens: usage.completion_tokens,
                });
            }
        }

        events
    }

    fn is_finished(&self) -> bool {
        // The terminator is the literal end-of-stream marker or connection close
        false
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        let dropped = self.tool_calls.discard();
        if dropped > 0 {
            tracing::warn!("Stream ended with {} unfinished tool call(s)", dropped);
        }
        vec![]
    }
}

fn map_stop_reason(reason: &str) -> StopReason {
    match reason {
        "stop" => StopReason::EndTurn,
        "length" => StopReason::MaxTokens,
        "tool_calls" | "function_call" => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

// ============================================================================
// Request types
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    stream: bool,
    stream_options: StreamOptions,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl OpenAIMessage {
    fn text(role: &str, content: String) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAITool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAIFunction,
}

#[derive(Debug, Serialize)]
struct OpenAIFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct OpenAIToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: OpenAIFunctionCall,
}

#[derive(Debug, Serialize)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

// Streaming response types

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
    #[serde(default)]
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    #[serde(default)]
    index: u32,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    message: String,
}

// ============================================================================
// Conversion functions
// ============================================================================

fn build_request(request: &ProviderRequest) -> OpenAIRequest {
    let mut messages = Vec::new();

    if let Some(prompt) = request.system_prompt.as_ref().filter(|s| !s.is_empty()) {
        messages.push(OpenAIMessage::text("system", prompt.clone()));
    }

    for message in &request.messages {
        messages.extend(convert_message(message));
    }

    let tools = if request.tools.is_empty() {
        None
    } else {
        Some(convert_tools(&request.tools))
    };
    let tool_choice = tools.as_ref().map(|_| serde_json::json!("auto"));

    OpenAIRequest {
        model: request.config.model.clone(),
        messages,
        stream: true,
        stream_options: StreamOptions {
            include_usage: true,
        },
        max_tokens: request.config.max_tokens,
        temperature: request.config.temperature,
        tools,
        tool_choice,
    }
}

fn convert_message(message: &Message) -> Vec<OpenAIMessage> {
    let blocks = match &message.content {
        MessageContent::Text(text) => {
            return vec![OpenAIMessage::text(message.role.as_str(), text.clone())];
        }
        MessageContent::Blocks(blocks) => blocks,
    };

    match message.role {
        Role::User => {
            // Tool results must directly follow the assistant's tool calls
            let mut result = Vec::new();
            let mut text_parts = Vec::new();
            for block in blocks {
                match block {
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } => result.push(OpenAIMessage {
                        role: "tool".to_string(),
                        content: Some(content.clone()),
                        tool_calls: None,
                        tool_call_id: Some(tool_use_id.clone()),
                    }),
                    ContentBlock::Text { text } if !text.is_empty() => {
                        text_parts.push(text.as_str())
                    }
                    _ => {}
                }
            }
            if !text_parts.is_empty() {
                result.push(OpenAIMessage::text("user", text_parts.join("")));
            }
            result
        }
        Role::Assistant => {
            let mut text_parts = Vec::new();
            let mut tool_calls = Vec::new();

            for block in blocks {
                match block {
                    ContentBlock::Text { text } => text_parts.push(text.as_str()),
                    ContentBlock::ToolUse { id, name, input } => tool_calls.push(OpenAIToolCall {
                        id: id.clone(),
                        call_type: "function".to_string(),
                        function: OpenAIFunctionCall {
                            name: name.clone(),
                            arguments: input.to_string(),
                        },
                    }),
                    ContentBlock::ToolResult { .. } => {}
                }
            }

            let text = text_parts.concat();
            if text.is_empty() && tool_calls.is_empty() {
                return vec![];
            }

            vec![OpenAIMessage {
                role: "assistant".to_string(),
                content: (!text.is_empty()).then_some(text),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
            }]
        }
    }
}

fn convert_tools(tools: &[ToolSchema]) -> Vec<OpenAITool> {
    tools
        .iter()
        .map(|tool| OpenAITool {
            tool_type: "function".to_string(),
            function: OpenAIFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.input_schema.clone(),
            },
        })
        .collect()
}
