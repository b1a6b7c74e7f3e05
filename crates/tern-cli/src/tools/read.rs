//! File reading tool

use async_trait::async_trait;
use serde_json::json;
use tern_agent::{Tool, ToolError};
use tokio::fs;

use super::required_str;
use crate::utils::expand_home;

const MAX_LINES: usize = 2000;
const MAX_LINE_LENGTH: usize = 2000;

/// Tool for reading file contents
pub struct ReadFileTool;

impl ReadFileTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ReadFileTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file. For large files, use offset and limit parameters."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to read (relative or absolute)"
                },
                "offset": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Line number to start reading from (1-indexed)"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Maximum number of lines to read"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> Result<String, ToolError> {
        let path = expand_home(required_str(&input, "path")?);

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::new(format!("Failed to read {}: {}", path.display(), e)))?;

        let lines: Vec<&str> = content.lines().collect();
        let total_lines = lines.len();

        // 1-indexed to 0-indexed
        let offset = input
            .get("offset")
            .and_then(|v| v.as_u64())
            .map(|o| (o as usize).saturating_sub(1))
            .unwrap_or(0);

        let limit = input
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|l| l as usize)
            .unwrap_or(MAX_LINES);

        if total_lines == 0 {
            return Ok("(empty file)".to_string());
        }
        if offset >= total_lines {
            return Err(ToolError::new(format!(
                "Offset {} is beyond end of file ({} lines total)",
                offset + 1,
                total_lines
            )));
        }

        let end = offset.saturating_add(limit).min(total_lines);

        let mut had_truncated = false;
        let formatted: Vec<String> = lines[offset..end]
            .iter()
            .map(|line| {
                if line.chars().count() > MAX_LINE_LENGTH {
                    had_truncated = true;
                    line.chars().take(MAX_LINE_LENGTH).collect()
                } else {
                    line.to_string()
                }
            })
            .collect();

        let mut output = formatted.join("\n");

        let mut notices = Vec::new();
        if had_truncated {
            notices.push(format!(
                "Some lines were truncated to {} characters",
                MAX_LINE_LENGTH
            ));
        }
        if end < total_lines {
            notices.push(format!(
                "{} more lines not shown. Use offset={} to continue reading",
                total_lines - end,
                end + 1
            ));
        }
        if !notices.is_empty() {
            output.push_str(&format!("\n\n... ({})", notices.join(". ")));
        }

        Ok(output)
    }
}
