//! Streaming event types and utilities

use crate::types::StopReason;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::pin::Pin;
use tokio_stream::Stream;

/// Normalized events emitted during one model call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A chunk of assistant text
    Text { text: String },
    /// A fully assembled tool call
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// Token counts. A counter reported as zero was not known at this point.
    Usage {
        input_tokens: u32,
        output_tokens: u32,
    },
    /// The backend signalled the end of the turn or of its tool calls
    Stop { reason: StopReason },
    /// Terminal failure; nothing follows it
    Error { message: String },
}

impl StreamEvent {
    /// Check if this is a terminal event
    pub fn is_error(&self) -> bool {
        matches!(self, StreamEvent::Error { .. })
    }
}

/// A stream of normalized events
pub type StreamEventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Parse accumulated tool arguments. Empty or malformed JSON becomes `{}`.
pub fn parse_tool_input(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Malformed tool arguments, using empty input: {}", e);
            serde_json::json!({})
        }
    }
}

#[derive(Debug, Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments_json: String,
}

/// Index-keyed builders for tool calls whose arguments arrive in fragments
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    pending: BTreeMap<u32, PendingToolCall>,
}

impl ToolCallAccumulator {
    /// Create an empty accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) a call at `index`
    pub fn start(&mut self, index: u32, id: impl Into<String>, name: impl Into<String>) {
        self.pending.insert(
            index,
            PendingToolCall {
                id: id.into(),
                name: name.into(),
                arguments_json: String::new(),
            },
        );
    }

    /// Merge identifying fields into the call at `index`, creating it if needed.
    /// Empty values leave existing fields untouched.
    pub fn merge(&mut self, index: u32, id: Option<&str>, name: Option<&str>) {
        let call = self.pending.entry(index).or_default();
        if let Some(id) = id.filter(|s| !s.is_empty()) {
            call.id = id.to_string();
        }
        if let Some(name) = name.filter(|s| !s.is_empty()) {
            call.name = name.to_string();
        }
    }

    /// Append an argument fragment. Fragments for unknown indices are dropped.
    pub fn push_fragment(&mut self, index: u32, fragment: &str) -> bool {
        match self.pending.get_mut(&index) {
            Some(call) => {
                call.arguments_json.push_str(fragment);
                true
            }
            None => false,
        }
    }

    /// Append an argument fragment, creating the call if needed
    pub fn push_fragment_or_insert(&mut self, index: u32, fragment: &str) {
        self.pending
            .entry(index)
            .or_default()
            .arguments_json
            .push_str(fragment);
    }

    /// Complete the call at `index`, if one is pending
    pub fn complete(&mut self, index: u32) -> Option<StreamEvent> {
        self.pending.remove(&index).map(into_event)
    }

    /// Complete every pending call in index order
    pub fn complete_all(&mut self) -> Vec<StreamEvent> {
        std::mem::take(&mut self.pending)
            .into_values()
            .map(into_event)
            .collect()
    }

    /// Drop unfinished calls, returning how many were discarded
    pub fn discard(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }
}

fn into_event(call: PendingToolCall) -> StreamEvent {
    StreamEvent::ToolUse {
        id: call.id,
        name: call.name,
        input: parse_tool_input(&call.arguments_json),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_tool_input_valid() {
        assert_eq!(parse_tool_input(r#"{"path": "/tmp/x"}"#), json!({"path": "/tmp/x"}));
    }

    #[test]
    fn test_parse_tool_input_degrades_to_empty_object() {
        assert_eq!(parse_tool_input(""), json!({}));
        assert_eq!(parse_tool_input("   "), json!({}));
        assert_eq!(parse_tool_input(r#"{"path":"#), json!({}));
    }

    #[test]
    fn test_fragments_without_completion_emit_nothing() {
        let mut acc = ToolCallAccumulator::new();
        acc.start(1, "toolu_1", "read_file");
        assert!(acc.push_fragment(1, r#"{"path":"#));
        assert!(acc.push_fragment(1, r#""/tmp/x"}"#));
        assert_eq!(acc.complete(0), None);

        let event = acc.complete(1).unwrap();
        assert_eq!(
            event,
            StreamEvent::ToolUse {
                id: "toolu_1".into(),
                name: "read_file".into(),
                input: json!({"path": "/tmp/x"}),
            }
        );
        assert_eq!(acc.discard(), 0);
    }

    #[test]
    fn test_fragment_for_unknown_index_is_dropped() {
        let mut acc = ToolCallAccumulator::new();
        assert!(!acc.push_fragment(3, "{}"));
        assert_eq!(acc.discard(), 0);
    }

    #[test]
    fn test_complete_all_in_index_order() {
        let mut acc = ToolCallAccumulator::new();
        acc.merge(2, Some("c"), Some("third"));
        acc.merge(0, Some("a"), Some("first"));
        acc.push_fragment_or_insert(0, r#"{"n":1}"#);
        acc.merge(1, Some("b"), Some("second"));

        let names: Vec<String> = acc
            .complete_all()
            .into_iter()
            .map(|e| match e {
                StreamEvent::ToolUse { name, .. } => name,
                other => panic!("expected tool use, got {:?}", other),
            })
            .collect();
        assert_eq!(names, vec!["first", "second", "third"]);
        assert_eq!(acc.discard(), 0);
    }

    #[test]
    fn test_merge_keeps_existing_fields_on_empty_values() {
        let mut acc = ToolCallAccumulator::new();
        acc.merge(0, Some("call_1"), Some("write_file"));
        acc.merge(0, Some(""), None);
        match acc.complete(0) {
            Some(StreamEvent::ToolUse { id, name, input }) => {
                assert_eq!(id, "call_1");
                assert_eq!(name, "write_file");
                assert_eq!(input, json!({}));
            }
            other => panic!("expected tool use, got {:?}", other),
        }
    }

    #[test]
    fn test_event_serialization_tag() {
        let value = serde_json::to_value(StreamEvent::Stop {
            reason: StopReason::ToolUse,
        })
        .unwrap();
        assert_eq!(value, json!({"type": "stop", "reason": "tool_use"}));
    }
}
