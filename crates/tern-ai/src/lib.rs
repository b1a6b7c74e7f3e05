//! tern-ai: streaming LLM provider adapters
//!
//! Each backend's wire protocol is decoded into one normalized sequence of
//! [`StreamEvent`]s: text chunks, fully assembled tool calls, usage counters,
//! a stop reason and at most one terminal error.

pub mod error;
pub mod providers;
pub mod registry;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use providers::Provider;
pub use registry::ProviderRegistry;
pub use stream::{StreamEvent, StreamEventStream};
pub use types::*;
