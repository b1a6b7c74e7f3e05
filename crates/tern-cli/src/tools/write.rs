//! File writing tool

use async_trait::async_trait;
use serde_json::json;
use tern_agent::{Tool, ToolError};
use tokio::fs;

use super::required_str;
use crate::utils::expand_home;

/// Tool for writing file contents
pub struct WriteFileTool;

impl WriteFileTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WriteFileTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates the file if it doesn't exist, overwrites if it does. Automatically creates parent directories."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to write (relative or absolute)"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write to the file"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> Result<String, ToolError> {
        let path_str = required_str(&input, "path")?;
        let content = required_str(&input, "content")?;

        if path_str == "~" {
            return Err(ToolError::new("Cannot write to home directory itself"));
        }
        let path = expand_home(path_str);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::new(format!("Failed to create directory: {}", e)))?;
        }

        fs::write(&path, content)
            .await
            .map_err(|e| ToolError::new(format!("Failed to write file: {}", e)))?;

        Ok(format!(
            "Successfully wrote {} bytes to {}",
            content.len(),
            path_str
        ))
    }
}
