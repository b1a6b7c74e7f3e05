//! Error types for tern-ai

use thiserror::Error;

/// Result type alias using tern-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to an LLM backend.
///
/// Streaming calls never return these directly: once a stream exists, every
/// failure is reported in-band as a single [`StreamEvent::Error`]. These
/// variants cover the steps around the stream (building requests, looking up
/// providers) and give the in-band messages a consistent wording.
///
/// [`StreamEvent::Error`]: crate::stream::StreamEvent::Error
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backend answered with a non-success status
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Server-sent events error
    #[error("SSE error: {0}")]
    Sse(String),

    /// No provider registered under this name
    #[error("Provider not supported: {0}")]
    UnsupportedProvider(String),
}

impl Error {
    /// Create an API error from a status code and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }
}
