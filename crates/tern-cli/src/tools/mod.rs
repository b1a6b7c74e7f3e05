//! Built-in tools for the agent

mod bash;
mod read;
mod write;

pub use bash::ExecuteCommandTool;
pub use read::ReadFileTool;
pub use write::WriteFileTool;

use std::sync::Arc;
use tern_agent::ToolRegistry;

/// Registry with every built-in tool
pub fn builtin() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ReadFileTool::new()));
    registry.register(Arc::new(WriteFileTool::new()));
    registry.register(Arc::new(ExecuteCommandTool::new()));
    registry
}

/// Get a required string argument
fn required_str<'a>(
    input: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, tern_agent::ToolError> {
    input
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| tern_agent::ToolError::new(format!("Missing '{}' argument", key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names() {
        assert_eq!(
            builtin().names(),
            vec!["read_file", "write_file", "execute_command"]
        );
    }

    #[test]
    fn test_schemas_are_objects() {
        for schema in builtin().schemas() {
            assert_eq!(schema.input_schema["type"], "object", "{}", schema.name);
            assert!(schema.input_schema["required"].is_array(), "{}", schema.name);
        }
    }
}
