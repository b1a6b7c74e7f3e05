//! LLM Provider implementations

pub mod anthropic;
pub mod openai;

use async_stream::stream;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource, retry};

use crate::{
    error::{Error, Result},
    stream::{StreamEvent, StreamEventStream},
    types::{ProviderConfig, ProviderRequest},
};

/// Literal payload some backends send as the last SSE message
pub const END_OF_STREAM: &str = "[DONE]";

/// A backend adapter that turns one request into a lazy stream of events.
///
/// Nothing touches the network until the returned stream is first polled.
/// Every failure after that point, including transport and status errors,
/// arrives in-band as exactly one [`StreamEvent::Error`], after which the
/// stream ends.
pub trait Provider: Send + Sync {
    /// Registry name of this backend
    fn name(&self) -> &str;

    /// Base URL used when the config does not override it
    fn default_base_url(&self) -> &str;

    /// Environment variable conventionally holding this backend's key
    fn api_key_env_var(&self) -> Option<&str>;

    /// Stream a response for the given conversation
    fn send(&self, request: ProviderRequest) -> StreamEventStream;
}

/// Get an API key from the config or from the provider's environment variable
pub fn resolve_api_key(config: &ProviderConfig, provider: &dyn Provider) -> Option<String> {
    if let Some(key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
        return Some(key.to_string());
    }
    provider
        .api_key_env_var()
        .and_then(|var| std::env::var(var).ok())
        .filter(|k| !k.is_empty())
}

/// Incremental decoder for one backend's SSE payloads.
pub(crate) trait WireParser {
    /// Decode one SSE message into zero or more normalized events
    fn feed(&mut self, event: &str, data: &str) -> Vec<StreamEvent>;

    /// Whether the backend has signalled the end of the message
    fn is_finished(&self) -> bool;

    /// Called once when the stream ends without an error
    fn finish(&mut self) -> Vec<StreamEvent>;
}

/// Run an SSE request through a parser, yielding normalized events.
pub(crate) fn drive<P>(request: Result<reqwest::RequestBuilder>, mut parser: P) -> StreamEventStream
where
    P: WireParser + Send + 'static,
{
    Box::pin(stream! {
        let request = match request {
            Ok(request) => request,
            Err(e) => {
                yield StreamEvent::Error { message: e.to_string() };
                return;
            }
        };

        let mut source = match EventSource::new(request) {
            Ok(source) => source,
            Err(e) => {
                yield StreamEvent::Error {
                    message: Error::Sse(format!("Failed to create event source: {}", e)).to_string(),
                };
                return;
            }
        };
        source.set_retry_policy(Box::new(retry::Never));

        let mut received_any = false;

        while let Some(event) = source.next().await {
            match event {
                Ok(Event::Open) => {
                    tracing::debug!("Event stream opened");
                }
                Ok(Event::Message(message)) => {
                    received_any = true;
                    if message.data.trim() == END_OF_STREAM {
                        break;
                    }
                    for event in parser.feed(&message.event, &message.data) {
                        let terminal = event.is_error();
                        yield event;
                        if terminal {
                            source.close();
                            return;
                        }
                    }
                    if parser.is_finished() {
                        break;
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => {
                    tracing::debug!("Event stream closed by server");
                    break;
                }
                Err(e) => {
                    source.close();
                    yield StreamEvent::Error { message: describe_failure(e).await };
                    return;
                }
            }
        }
        source.close();

        if !received_any {
            yield StreamEvent::Error {
                message: Error::Sse("Response body ended before any event".to_string()).to_string(),
            };
            return;
        }

        for event in parser.finish() {
            yield event;
        }
    })
}

/// Turn a failed connection into a readable message, reading the body of
/// rejected responses so the backend's own explanation is kept.
async fn describe_failure(error: reqwest_eventsource::Error) -> String {
    match error {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            let body = response.text().await.unwrap_or_default();
            let message = extract_error_message(&body)
                .or_else(|| status.canonical_reason().map(str::to_string))
                .unwrap_or_else(|| "request failed".to_string());
            Error::api(status.as_u16(), message).to_string()
        }
        reqwest_eventsource::Error::InvalidContentType(content_type, response) => {
            let status = response.status();
            if status.is_success() {
                return Error::Sse(format!(
                    "Expected an event stream, got content type {:?}",
                    content_type
                ))
                .to_string();
            }
            let body = response.text().await.unwrap_or_default();
            let message = extract_error_message(&body).unwrap_or_else(|| status.to_string());
            Error::api(status.as_u16(), message).to_string()
        }
        reqwest_eventsource::Error::Transport(e) => Error::Http(e).to_string(),
        other => Error::Sse(other.to_string()).to_string(),
    }
}

/// Pull `error.message` (or a bare `message`) out of a JSON error body.
pub(crate) fn extract_error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => value
            .pointer("/error/message")
            .or_else(|| value.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .or_else(|| Some(trimmed.to_string())),
        Err(_) => Some(trimmed.to_string()),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_error_message_nested() {
        let body = r#"{"type":"error","error":{"type":"authentication_error","message":"invalid x-api-key"}}"#;
        assert_eq!(extract_error_message(body).as_deref(), Some("invalid x-api-key"));
    }

    #[test]
    fn test_extract_error_message_plain_text() {
        assert_eq!(extract_error_message("Bad gateway\n").as_deref(), Some("Bad gateway"));
        assert_eq!(extract_error_message("   "), None);
    }

    #[test]
    fn test_extract_error_message_unrecognized_json_keeps_body() {
        assert_eq!(
            extract_error_message(r#"{"detail":"nope"}"#).as_deref(),
            Some(r#"{"detail":"nope"}"#)
        );
    }

    #[test]
    fn test_resolve_api_key_prefers_config() {
        let provider = openai::OpenAIProvider::ollama();
        let config = ProviderConfig::new("llama3").with_api_key("explicit");
        assert_eq!(resolve_api_key(&config, &provider).as_deref(), Some("explicit"));

        // ollama has no env var, so an unset key stays unset
        let config = ProviderConfig::new("llama3");
        assert_eq!(resolve_api_key(&config, &provider), None);
    }
}
