//! Agent loop: alternates model calls with tool execution until a turn ends

use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tern_ai::{
    ContentBlock, Message, Provider, ProviderConfig, ProviderRequest, StopReason, StreamEvent,
    ToolSchema,
};

use crate::{
    callbacks::AgentCallbacks,
    context::{ContextConfig, manage_context},
    conversation::{ConversationState, Usage},
    error::{Error, Result},
    tool::{BoxedTool, ToolRegistry},
};

/// Default cap on model calls per turn
pub const DEFAULT_MAX_ITERATIONS: u32 = 20;

/// Tools that need caller confirmation before they run
pub const DANGEROUS_TOOLS: &[&str] = &["execute_command", "write_file"];

/// Check whether a tool needs confirmation
pub fn is_dangerous(name: &str) -> bool {
    DANGEROUS_TOOLS.contains(&name)
}

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model and request options passed to every call
    pub provider: ProviderConfig,
    /// Token budget applied before every call
    pub context: ContextConfig,
    /// Maximum model calls per turn
    pub max_iterations: u32,
}

impl AgentConfig {
    pub fn new(provider: ProviderConfig) -> Self {
        Self {
            provider,
            context: ContextConfig::default(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// How a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnCompletion {
    /// The model finished without requesting more tools
    Completed,
    /// The iteration cap was reached while the model still wanted tools
    IterationLimit,
}

/// Summary of one completed turn
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub completion: TurnCompletion,
    /// Model calls made during the turn
    pub iterations: u32,
    /// Stop reason of the last model call, if the backend sent one
    pub stop_reason: Option<StopReason>,
    /// Tokens consumed by this turn alone
    pub usage: Usage,
}

/// One model call's worth of streamed output
struct ModelResponse {
    text: String,
    tool_calls: Vec<ContentBlock>,
    stop_reason: Option<StopReason>,
}

/// The main agent that orchestrates conversations
pub struct Agent {
    config: AgentConfig,
    provider: Arc<dyn Provider>,
    tools: ToolRegistry,
    state: ConversationState,

    /// Compiled JSON schema validators keyed by tool name
    schema_cache: HashMap<String, Arc<jsonschema::Validator>>,
}

impl Agent {
    /// Create a new agent
    pub fn new(config: AgentConfig, provider: Arc<dyn Provider>, tools: ToolRegistry) -> Self {
        let mut agent = Self {
            config,
            provider,
            tools: ToolRegistry::new(),
            state: ConversationState::default(),
            schema_cache: HashMap::new(),
        };
        agent.set_tools(tools);
        agent
    }

    /// Get the current state
    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    /// Replace the conversation, e.g. with a stored session
    pub fn restore(&mut self, state: ConversationState) {
        self.state = state;
    }

    /// Clear messages and counters, keeping the system prompt
    pub fn clear(&mut self) {
        self.state.clear();
    }

    /// Get the agent config
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Set the system prompt
    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.state.system_prompt = Some(prompt.into());
    }

    /// Set the token budget
    pub fn set_context_config(&mut self, context: ContextConfig) {
        self.config.context = context;
    }

    /// Set the per-turn iteration cap
    pub fn set_max_iterations(&mut self, max_iterations: u32) {
        self.config.max_iterations = max_iterations;
    }

    /// Set tools (replaces existing)
    pub fn set_tools(&mut self, tools: ToolRegistry) {
        self.schema_cache.clear();
        for tool in tools.iter() {
            self.cache_tool_schema(tool);
        }
        self.tools = tools;
    }

    /// Get tool names
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.names()
    }

    /// Compile and cache the JSON schema validator for a tool.
    fn cache_tool_schema(&mut self, tool: &BoxedTool) {
        let schema = tool.input_schema();
        match jsonschema::validator_for(&schema) {
            Ok(validator) => {
                self.schema_cache
                    .insert(tool.name().to_string(), Arc::new(validator));
            }
            Err(e) => {
                tracing::warn!(
                    "Invalid input schema for tool '{}', skipping validation: {}",
                    tool.name(),
                    e
                );
            }
        }
    }

    /// Run one user turn to completion.
    ///
    /// Errors end the turn early: context errors before any network call,
    /// provider errors without committing the failed call's partial output.
    /// Hitting the iteration cap is not an error; see [`TurnCompletion`].
    pub async fn run_turn(
        &mut self,
        input: impl Into<String>,
        callbacks: &dyn AgentCallbacks,
    ) -> Result<TurnOutcome> {
        self.state.messages.push(Message::user(input.into()));
        self.state.turn_count += 1;

        let tools = self.tools.schemas();
        let max_iterations = self.config.max_iterations.max(1);
        let mut usage = Usage::default();
        let mut iteration = 0;

        loop {
            iteration += 1;
            tracing::debug!(
                "Turn {} iteration {}/{}",
                self.state.turn_count,
                iteration,
                max_iterations
            );

            let managed = match manage_context(
                &self.state.messages,
                &self.config.context,
                self.state.system_prompt.as_deref(),
                &tools,
            ) {
                Ok(managed) => managed,
                Err(e) => {
                    if iteration == 1 {
                        // Nothing was sent yet, so the turn leaves no trace
                        self.state.messages.pop();
                        self.state.turn_count -= 1;
                    }
                    return Err(e.into());
                }
            };
            if managed.dropped > 0 {
                tracing::info!("Dropped {} messages to fit the context budget", managed.dropped);
                callbacks.on_context_truncation(managed.dropped).await;
                self.state.messages = managed.messages;
            }

            let response = self
                .stream_response(tools.clone(), callbacks, &mut usage)
                .await?;
            let stop_reason = response.stop_reason;

            let wants_tools =
                !response.tool_calls.is_empty() && stop_reason == Some(StopReason::ToolUse);

            let mut content = Vec::new();
            if !response.text.is_empty() {
                content.push(ContentBlock::text(response.text));
            }
            if wants_tools {
                content.extend(response.tool_calls);
            } else if !response.tool_calls.is_empty() {
                // Without results these would leave the history unanswerable
                tracing::warn!(
                    "Ignoring {} tool call(s) sent with stop reason {:?}",
                    response.tool_calls.len(),
                    stop_reason
                );
            }

            if !wants_tools {
                // An empty assistant message is dropped by every adapter anyway
                if content.is_empty() {
                    tracing::debug!("Model returned an empty response");
                } else {
                    self.state.messages.push(Message::assistant(content));
                }
                return Ok(TurnOutcome {
                    completion: TurnCompletion::Completed,
                    iterations: iteration,
                    stop_reason,
                    usage,
                });
            }

            let assistant = Message::assistant(content);
            let calls: Vec<(String, String, serde_json::Value)> = assistant
                .tool_uses()
                .into_iter()
                .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
                .collect();
            self.state.messages.push(assistant);

            let mut results = Vec::with_capacity(calls.len());
            for (id, name, input) in calls {
                callbacks.on_tool_call(&name, &input).await;
                let (output, is_error) = self.execute_tool(&name, &input, callbacks).await;
                callbacks.on_tool_result(&name, &output, is_error).await;
                results.push(ContentBlock::tool_result(id, output, is_error));
            }
            self.state.messages.push(Message::user(results));

            if iteration >= max_iterations {
                tracing::warn!(
                    "Reached the limit of {} iterations with tool calls still pending",
                    max_iterations
                );
                return Ok(TurnOutcome {
                    completion: TurnCompletion::IterationLimit,
                    iterations: iteration,
                    stop_reason,
                    usage,
                });
            }
        }
    }

    /// Make one model call, forwarding text as it arrives.
    async fn stream_response(
        &mut self,
        tools: Vec<ToolSchema>,
        callbacks: &dyn AgentCallbacks,
        usage: &mut Usage,
    ) -> Result<ModelResponse> {
        let request = ProviderRequest {
            config: self.config.provider.clone(),
            messages: self.state.messages.clone(),
            system_prompt: self.state.system_prompt.clone(),
            tools,
        };

        let mut stream = self.provider.send(request);
        let mut response = ModelResponse {
            text: String::new(),
            tool_calls: Vec::new(),
            stop_reason: None,
        };

        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::Text { text } => {
                    callbacks.on_text(&text).await;
                    response.text.push_str(&text);
                }
                StreamEvent::ToolUse { id, name, input } => {
                    response
                        .tool_calls
                        .push(ContentBlock::tool_use(id, name, input));
                }
                StreamEvent::Usage {
                    input_tokens,
                    output_tokens,
                } => {
                    self.state.add_usage(input_tokens, output_tokens);
                    usage.add(input_tokens, output_tokens);
                }
                StreamEvent::Stop { reason } => {
                    response.stop_reason = Some(reason);
                }
                StreamEvent::Error { message } => {
                    tracing::error!("{} stream failed: {}", self.provider.name(), message);
                    return Err(Error::Provider(message));
                }
            }
        }

        Ok(response)
    }

    /// Run one tool call. Every failure becomes an error result.
    async fn execute_tool(
        &self,
        name: &str,
        input: &serde_json::Value,
        callbacks: &dyn AgentCallbacks,
    ) -> (String, bool) {
        let Some(tool) = self.tools.get(name) else {
            tracing::warn!("Model requested unknown tool '{}'", name);
            return (format!("Unknown tool: {}", name), true);
        };

        if let Some(err) = self
            .schema_cache
            .get(name)
            .and_then(|validator| validate_with_validator(input, validator))
        {
            return (err, true);
        }

        if is_dangerous(name) && !callbacks.confirm_tool(name, input).await {
            tracing::info!("User denied execution of {}", name);
            return (format!("User denied execution of {}", name), true);
        }

        match tool.execute(input.clone()).await {
            Ok(output) => (output, false),
            Err(e) => {
                tracing::debug!("Tool '{}' failed: {}", name, e);
                (e.to_string(), true)
            }
        }
    }
}

/// Validate tool arguments using a pre-compiled validator.
/// Returns `Some(error_message)` if validation fails, `None` if valid.
fn validate_with_validator(
    args: &serde_json::Value,
    validator: &jsonschema::Validator,
) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Tool argument validation failed:\n{}",
            errors.join("\n")
        ))
    }
}
