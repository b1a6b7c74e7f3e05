//! Anthropic Messages API provider (block-oriented event stream)

use serde::{Deserialize, Serialize};

use super::{Provider, WireParser, drive, resolve_api_key};
use crate::{
    error::Result,
    stream::{StreamEvent, StreamEventStream, ToolCallAccumulator},
    types::{ContentBlock, Message, MessageContent, ProviderRequest, StopReason, ToolSchema},
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Anthropic API client
pub struct AnthropicProvider {
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn build_http_request(&self, request: &ProviderRequest) -> Result<reqwest::RequestBuilder> {
        let body = serde_json::to_vec(&build_request(request))?;
        let url = format!("{}/v1/messages", request.config.base_url_or(DEFAULT_BASE_URL));

        tracing::debug!("Anthropic API URL: {}", url);

        let mut builder = self
            .client
            .post(&url)
            .header("accept", "text/event-stream")
            .header("content-type", "application/json")
            .header("anthropic-version", API_VERSION)
            .body(body);

        if let Some(key) = resolve_api_key(&request.config, self) {
            builder = builder.header("x-api-key", key);
        }

        Ok(builder)
    }
}

impl Default for AnthropicProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_base_url(&self) -> &str {
        DEFAULT_BASE_URL
    }

    fn api_key_env_var(&self) -> Option<&str> {
        Some("ANTHROPIC_API_KEY")
    }

    fn send(&self, request: ProviderRequest) -> StreamEventStream {
        drive(self.build_http_request(&request), AnthropicStreamParser::new())
    }
}

// ============================================================================
// Stream parsing
// ============================================================================

/// Decoder for the block-oriented stream.
///
/// Text deltas are forwarded immediately. Tool arguments arrive as JSON
/// fragments keyed by block index and are released as one `ToolUse` when that
/// block's `content_block_stop` arrives.
#[derive(Debug, Default)]
pub struct AnthropicStreamParser {
    tool_calls: ToolCallAccumulator,
    finished: bool,
}

impl AnthropicStreamParser {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WireParser for AnthropicStreamParser {
    fn feed(&mut self, _event: &str, data: &str) -> Vec<StreamEvent> {
        let event = match serde_json::from_str::<WireEvent>(data) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Skipping undecodable Anthropic event: {}", e);
                return vec![];
            }
        };

        match event {
            WireEvent::MessageStart { message } => vec![StreamEvent::Usage {
                input_tokens: message.usage.input_tokens,
                output_tokens: 0,
            }],
            WireEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                WireBlock::Text { text } if !text.is_empty() => vec![StreamEvent::Text { text }],
                WireBlock::ToolUse { id, name } => {
                    self.tool_calls.start(index, id, name);
                    vec![]
                }
                _ => vec![],
            },
            WireEvent::ContentBlockDelta { index, delta } => match delta {
                WireDelta::TextDelta { text } if !text.is_empty() => {
                    vec![StreamEvent::Text { text }]
                }
                WireDelta::InputJsonDelta { partial_json } => {
                    if !self.tool_calls.push_fragment(index, &partial_json) {
                        tracing::warn!("Argument fragment for unknown block {}", index);
                    }
                    vec![]
                }
                _ => vec![],
            },
            WireEvent::ContentBlockStop { index } => {
                self.tool_calls.complete(index).into_iter().collect()
            }
            WireEvent::MessageDelta { delta, usage } => {
                let mut events = Vec::new();
                if let Some(usage) = usage {
                    events.push(StreamEvent::Usage {
                        input_tokens: 0,
                        output_tokens: usage.output_tokens,
                    });
                }
                if let Some(reason) = delta.stop_reason {
                    events.push(StreamEvent::Stop {
                        reason: map_stop_reason(&reason),
                    });
                }
                events
            }
            WireEvent::MessageStop => {
                self.finished = true;
                vec![]
            }
            WireEvent::Error { error } => vec![StreamEvent::Error {
                message: format!("{} ({})", error.message, error.error_type),
            }],
            WireEvent::Ping | WireEvent::Unknown => vec![],
        }
    }

    fn is_finished(&self) -> bool {
        self.finished
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
        "end_turn" => StopReason::EndTurn,
        "max_tokens" => StopReason::MaxTokens,
        "tool_use" => StopReason::ToolUse,
        "stop_sequence" => StopReason::EndTurn,
        _ => StopReason::EndTurn,
    }
}

// ============================================================================
// Request types
// ============================================================================

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<Vec<SystemBlock>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
}

#[derive(Debug, Serialize)]
struct SystemBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Debug, Serialize)]
struct CacheControl {
    #[serde(rename = "type")]
    control_type: String,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

// ============================================================================
// Response event types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    MessageStart {
        message: MessageInfo,
    },
    ContentBlockStart {
        index: u32,
        content_block: WireBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: WireDelta,
    },
    ContentBlockStop {
        index: u32,
    },
    MessageDelta {
        delta: MessageDelta,
        #[serde(default)]
        usage: Option<OutputUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: ApiError,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct MessageInfo {
    usage: InputUsage,
}

#[derive(Debug, Deserialize)]
struct InputUsage {
    #[serde(default)]
    input_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OutputUsage {
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireDelta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type", default)]
    error_type: String,
    message: String,
}

// ============================================================================
// Conversion functions
// ============================================================================

fn build_request(request: &ProviderRequest) -> AnthropicRequest {
    let tools = if request.tools.is_empty() {
        None
    } else {
        Some(convert_tools(&request.tools))
    };

    let system = request
        .system_prompt
        .as_ref()
        .filter(|s| !s.is_empty())
        .map(|prompt| {
            vec![SystemBlock {
                block_type: "text".to_string(),
                text: prompt.clone(),
                cache_control: Some(CacheControl {
                    control_type: "ephemeral".to_string(),
                }),
            }]
        });

    AnthropicRequest {
        model: request.config.model.clone(),
        messages: convert_messages(&request.messages),
        max_tokens: request.config.max_tokens,
        stream: true,
        system,
        temperature: request.config.temperature,
        tools,
    }
}

fn convert_messages(messages: &[Message]) -> Vec<AnthropicMessage> {
    let mut result = vec![];

    for message in messages {
        let content = match &message.content {
            MessageContent::Text(text) => serde_json::Value::String(text.clone()),
            MessageContent::Blocks(blocks) => {
                let blocks: Vec<serde_json::Value> =
                    blocks.iter().filter_map(convert_block).collect();
                if blocks.is_empty() {
                    continue;
                }
                serde_json::Value::Array(blocks)
            }
        };

        result.push(AnthropicMessage {
            role: message.role.as_str().to_string(),
            content,
        });
    }

    result
}

fn convert_block(block: &ContentBlock) -> Option<serde_json::Value> {
    match block {
        // The API rejects empty text blocks
        ContentBlock::Text { text } if text.is_empty() => None,
        ContentBlock::Text { text } => Some(serde_json::json!({ "type": "text", "text": text })),
        ContentBlock::ToolUse { id, name, input } => Some(serde_json::json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": input
        })),
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => Some(serde_json::json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": content,
            "is_error": is_error
        })),
    }
}

fn convert_tools(tools: &[ToolSchema]) -> Vec<AnthropicTool> {
    tools
        .iter()
        .map(|tool| {
            let input_schema = if tool.input_schema.is_object() {
                let mut schema = tool.input_schema.clone();
                if let Some(obj) = schema.as_object_mut() {
                    obj.entry("type").or_insert(serde_json::json!("object"));
                }
                schema
            } else {
                serde_json::json!({
                    "type": "object",
                    "properties": {},
                    "required": []
                })
            };

            AnthropicTool {
                name: tool.name.clone(),
                description: tool.description.clone(),
                input_schema,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_support::{replay, sse_body};
    use crate::types::ProviderConfig;
    use futures::StreamExt;
    use serde_json::json;

    fn request(base_url: &str) -> ProviderRequest {
        ProviderRequest {
            config: ProviderConfig::new("claude-test")
                .with_api_key("sk-test")
                .with_base_url(base_url),
            messages: vec![Message::user("hi")],
            system_prompt: Some("be brief".into()),
            tools: vec![],
        }
    }

    const TOOL_CALL_TRANSCRIPT: &[(&str, &str)] = &[
        (
            "message_start",
            r#"{"type":"message_start","message":{"id":"msg_1","usage":{"input_tokens":42,"output_tokens":1}}}"#,
        ),
        (
            "content_block_start",
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
        ),
        (
            "content_block_delta",
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Let me look."}}"#,
        ),
        ("content_block_stop", r#"{"type":"content_block_stop","index":0}"#),
        (
            "content_block_start",
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"read_file","input":{}}}"#,
        ),
        (
            "content_block_delta",
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"path\":"}}"#,
        ),
        (
            "content_block_delta",
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"\"/tmp/x\"}"}}"#,
        ),
        ("content_block_stop", r#"{"type":"content_block_stop","index":1}"#),
        (
            "message_delta",
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":17}}"#,
        ),
        ("message_stop", r#"{"type":"message_stop"}"#),
    ];

    #[test]
    fn test_tool_call_transcript() {
        let mut parser = AnthropicStreamParser::new();
        let events = replay(&mut parser, TOOL_CALL_TRANSCRIPT);

        assert_eq!(
            events,
            vec![
                StreamEvent::Usage {
                    input_tokens: 42,
                    output_tokens: 0
                },
                StreamEvent::Text {
                    text: "Let me look.".into()
                },
                StreamEvent::ToolUse {
                    id: "toolu_1".into(),
                    name: "read_file".into(),
                    input: json!({"path": "/tmp/x"}),
                },
                StreamEvent::Usage {
                    input_tokens: 0,
                    output_tokens: 17
                },
                StreamEvent::Stop {
                    reason: StopReason::ToolUse
                },
            ]
        );
    }

    #[test]
    fn test_no_block_stop_means_no_tool_use() {
        let mut parser = AnthropicStreamParser::new();
        // Everything up to, but not including, the block stop for index 1
        let events: Vec<StreamEvent> = TOOL_CALL_TRANSCRIPT[..7]
            .iter()
            .flat_map(|(name, data)| parser.feed(name, data))
            .collect();
        assert!(!events.iter().any(|e| matches!(e, StreamEvent::ToolUse { .. })));

        // The completion signal releases exactly one tool use
        let events = parser.feed(TOOL_CALL_TRANSCRIPT[7].0, TOOL_CALL_TRANSCRIPT[7].1);
        assert_eq!(
            events,
            vec![StreamEvent::ToolUse {
                id: "toolu_1".into(),
                name: "read_file".into(),
                input: json!({"path": "/tmp/x"}),
            }]
        );
    }

    #[test]
    fn test_unfinished_tool_call_is_discarded() {
        let mut parser = AnthropicStreamParser::new();
        let events = replay(&mut parser, &TOOL_CALL_TRANSCRIPT[..7]);
        assert!(!events.iter().any(|e| matches!(e, StreamEvent::ToolUse { .. })));
        assert!(parser.feed(TOOL_CALL_TRANSCRIPT[7].0, TOOL_CALL_TRANSCRIPT[7].1).is_empty());
    }

    #[test]
    fn test_malformed_arguments_degrade_to_empty_object() {
        let mut parser = AnthropicStreamParser::new();
        let events = replay(
            &mut parser,
            &[
                (
                    "content_block_start",
                    r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"toolu_9","name":"execute_command"}}"#,
                ),
                (
                    "content_block_delta",
                    r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"command\": \"ls"}}"#,
                ),
                ("content_block_stop", r#"{"type":"content_block_stop","index":0}"#),
            ],
        );
        assert_eq!(
            events,
            vec![StreamEvent::ToolUse {
                id: "toolu_9".into(),
                name: "execute_command".into(),
                input: json!({}),
            }]
        );
    }

    #[test]
    fn test_error_event_is_terminal() {
        let mut parser = AnthropicStreamParser::new();
        let events = replay(
            &mut parser,
            &[
                (
                    "content_block_delta",
                    r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"partial"}}"#,
                ),
                (
                    "error",
                    r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
                ),
                (
                    "content_block_delta",
                    r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"never"}}"#,
                ),
            ],
        );
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            StreamEvent::Error {
                message: "Overloaded (overloaded_error)".into()
            }
        );
    }

    #[test]
    fn test_undecodable_and_unknown_events_are_skipped() {
        let mut parser = AnthropicStreamParser::new();
        let events = replay(
            &mut parser,
            &[
                ("ping", r#"{"type":"ping"}"#),
                ("content_block_delta", "{not json"),
                ("mystery", r#"{"type":"brand_new_event","x":1}"#),
                (
                    "content_block_delta",
                    r#"{"type":"content_block_delta","index":0,"delta":{"type":"thinking_delta","thinking":"hmm"}}"#,
                ),
                (
                    "message_delta",
                    r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":3}}"#,
                ),
            ],
        );
        assert_eq!(
            events,
            vec![
                StreamEvent::Usage {
                    input_tokens: 0,
                    output_tokens: 3
                },
                StreamEvent::Stop {
                    reason: StopReason::EndTurn
                },
            ]
        );
    }

    #[test]
    fn test_stop_reason_mapping() {
        assert_eq!(map_stop_reason("end_turn"), StopReason::EndTurn);
        assert_eq!(map_stop_reason("stop_sequence"), StopReason::EndTurn);
        assert_eq!(map_stop_reason("tool_use"), StopReason::ToolUse);
        assert_eq!(map_stop_reason("max_tokens"), StopReason::MaxTokens);
        assert_eq!(map_stop_reason("pause_turn"), StopReason::EndTurn);
    }

    #[test]
    fn test_request_shape() {
        let req = ProviderRequest {
            config: ProviderConfig::new("claude-test"),
            messages: vec![
                Message::user("read it"),
                Message::assistant(vec![
                    ContentBlock::text(""),
                    ContentBlock::tool_use("toolu_1", "read_file", json!({"path": "a"})),
                ]),
                Message::user(vec![ContentBlock::tool_result("toolu_1", "contents", false)]),
            ],
            system_prompt: Some("system".into()),
            tools: vec![ToolSchema::new(
                "read_file",
                "Read a file",
                json!({"properties": {"path": {"type": "string"}}}),
            )],
        };
        let body = serde_json::to_value(build_request(&req)).unwrap();

        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 8192);
        assert_eq!(body["system"][0]["text"], "system");
        assert_eq!(body["messages"][0]["content"], "read it");
        // empty text block dropped, tool_use kept
        assert_eq!(body["messages"][1]["content"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][1]["content"][0]["type"], "tool_use");
        assert_eq!(body["messages"][2]["role"], "user");
        assert_eq!(body["messages"][2]["content"][0]["tool_use_id"], "toolu_1");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert!(body.get("temperature").is_none());
    }

    #[tokio::test]
    async fn test_unauthorized_yields_single_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .with_status(401)
            .with_header("content-type", "application/json")
            .with_body(r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#)
            .create_async()
            .await;

        let provider = AnthropicProvider::new();
        let events: Vec<StreamEvent> = provider.send(request(&server.url())).collect().await;

        mock.assert_async().await;
        assert_eq!(events.len(), 1, "got {:?}", events);
        match &events[0] {
            StreamEvent::Error { message } => {
                assert!(message.contains("401"), "got: {}", message);
                assert!(message.contains("invalid x-api-key"), "got: {}", message);
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_streams_over_http() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", "sk-test")
            .match_header("anthropic-version", API_VERSION)
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(sse_body(TOOL_CALL_TRANSCRIPT))
            .create_async()
            .await;

        let provider = AnthropicProvider::new();
        let events: Vec<StreamEvent> = provider.send(request(&server.url())).collect().await;

        mock.assert_async().await;
        assert_eq!(events.len(), 5, "got {:?}", events);
        assert!(matches!(events[2], StreamEvent::ToolUse { .. }));
        assert_eq!(
            events[4],
            StreamEvent::Stop {
                reason: StopReason::ToolUse
            }
        );
    }

    #[tokio::test]
    async fn test_empty_body_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/messages")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body("")
            .create_async()
            .await;

        let provider = AnthropicProvider::new();
        let events: Vec<StreamEvent> = provider.send(request(&server.url())).collect().await;

        assert_eq!(events.len(), 1);
        assert!(events[0].is_error());
    }
}
