//! Error types for tern-agent

use thiserror::Error;

use crate::context::ContextError;

/// Result type alias using tern-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that end a turn.
///
/// Tool failures are not represented here: they become error tool results
/// and the loop carries on.
#[derive(Error, Debug)]
pub enum Error {
    /// History could not be fitted into the token budget
    #[error(transparent)]
    Context(#[from] ContextError),

    /// The provider reported an error event during a model call
    #[error("Provider error: {0}")]
    Provider(String),
}

/// Failure reported by a tool. The message is sent back to the model.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ToolError(pub String);

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
