//! tern-agent: agent loop with tool execution
//!
//! Runs one user turn at a time against a [`tern_ai::Provider`]: fits the
//! history into a token budget, streams the model's reply, executes any
//! requested tools in order and feeds their results back until the model
//! stops asking for tools or the iteration cap is reached.

pub mod agent;
pub mod callbacks;
pub mod context;
pub mod conversation;
pub mod error;
pub mod tool;

pub use agent::{Agent, AgentConfig, DANGEROUS_TOOLS, TurnCompletion, TurnOutcome};
pub use callbacks::{AgentCallbacks, NoopCallbacks};
pub use context::{ContextConfig, ContextError, ContextStrategy, ManagedContext};
pub use conversation::{ConversationState, Usage};
pub use error::{Error, Result, ToolError};
pub use tool::{BoxedTool, Tool, ToolRegistry};
