//! Tool trait and registry

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tern_ai::ToolSchema;

use crate::error::ToolError;

/// Trait for executable tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (used in API calls)
    fn name(&self) -> &str;

    /// Tool description for the LLM
    fn description(&self) -> &str;

    /// JSON Schema for the input object
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool. `Ok` text and `Err` messages both go back to the model.
    async fn execute(&self, input: serde_json::Value) -> Result<String, ToolError>;
}

/// Type alias for a shared tool
pub type BoxedTool = Arc<dyn Tool>;

/// Convert a Tool to its wire schema
pub fn to_schema(tool: &dyn Tool) -> ToolSchema {
    ToolSchema::new(tool.name(), tool.description(), tool.input_schema())
}

/// Tools available to the agent, in registration order
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<BoxedTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing any tool with the same name in place
    pub fn register(&mut self, tool: BoxedTool) {
        let name = tool.name().to_string();
        match self.index.get(&name) {
            Some(&idx) => self.tools[idx] = tool,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    /// Look up a tool by name
    pub fn get(&self, name: &str) -> Option<BoxedTool> {
        self.index.get(name).map(|&idx| Arc::clone(&self.tools[idx]))
    }

    /// Wire schemas for every tool
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|t| to_schema(t.as_ref())).collect()
    }

    /// Get tool names
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Iterate over registered tools
    pub fn iter(&self) -> impl Iterator<Item = &BoxedTool> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl FromIterator<BoxedTool> for ToolRegistry {
    fn from_iter<I: IntoIterator<Item = BoxedTool>>(iter: I) -> Self {
        let mut registry = Self::new();
        for tool in iter {
            registry.register(tool);
        }
        registry
    }
}
