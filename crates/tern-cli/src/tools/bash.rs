//! Shell command execution tool

use async_trait::async_trait;
use serde_json::json;
use std::process::Stdio;
use std::time::Duration;
use tern_agent::{Tool, ToolError};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use super::required_str;

/// Maximum output size in bytes before truncation
const MAX_OUTPUT_SIZE: usize = 100_000; // 100KB
/// Maximum number of lines before truncation
const MAX_OUTPUT_LINES: usize = 1000;
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Tool for executing shell commands
pub struct ExecuteCommandTool;

impl ExecuteCommandTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ExecuteCommandTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Output captured from one pipe
#[derive(Default)]
struct Captured {
    text: String,
    lines: usize,
    truncated: bool,
}

impl Captured {
    fn push_line(&mut self, line: &str) {
        if self.truncated {
            return;
        }
        if self.lines >= MAX_OUTPUT_LINES || self.text.len() + line.len() > MAX_OUTPUT_SIZE {
            self.truncated = true;
            return;
        }
        if !self.text.is_empty() {
            self.text.push('\n');
        }
        self.text.push_str(line);
        self.lines += 1;
    }

    fn notice(&self, label: &str) -> Option<String> {
        self.truncated.then(|| {
            format!(
                "\n\n... ({} truncated at {} lines / {}KB)",
                label,
                self.lines,
                MAX_OUTPUT_SIZE / 1024
            )
        })
    }
}

/// Drain a pipe to EOF, keeping what fits under the limits
async fn capture<R: AsyncRead + Unpin>(pipe: Option<R>, label: &str) -> Captured {
    let mut captured = Captured::default();
    let Some(pipe) = pipe else {
        return captured;
    };
    let mut lines = BufReader::new(pipe).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => captured.push_line(&line),
            Ok(None) => break,
            Err(e) => {
                captured.push_line(&format!("{} read error: {}", label, e));
                break;
            }
        }
    }
    captured
}

fn combine(stdout: Captured, stderr: Captured) -> String {
    let mut result = stdout.text.clone();
    if let Some(notice) = stdout.notice("stdout") {
        result.push_str(&notice);
    }
    if !stderr.text.is_empty() {
        if !result.is_empty() {
            result.push('\n');
        }
        result.push_str(&stderr.text);
        if let Some(notice) = stderr.notice("stderr") {
            result.push_str(&notice);
        }
    }
    result
}

#[async_trait]
impl Tool for ExecuteCommandTool {
    fn name(&self) -> &str {
        "execute_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the current working directory. Returns stdout and stderr."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "timeout": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Timeout in seconds (optional, default 120)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> Result<String, ToolError> {
        let command = required_str(&input, "command")?;
        let timeout_secs = input
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let (shell, shell_arg) = if cfg!(target_os = "windows") {
            ("cmd", "/C")
        } else {
            ("sh", "-c")
        };

        let mut child = Command::new(shell)
            .arg(shell_arg)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::new(format!("Failed to spawn command: {}", e)))?;

        tracing::debug!("Running command: {}", command);

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let finished = tokio::time::timeout(Duration::from_secs(timeout_secs), async {
            let (stdout, stderr, status) = tokio::join!(
                capture(stdout, "stdout"),
                capture(stderr, "stderr"),
                child.wait()
            );
            (stdout, stderr, status)
        })
        .await;

        let (stdout, stderr, status) = match finished {
            Ok(done) => done,
            Err(_) => {
                let _ = child.kill().await;
                return Err(ToolError::new(format!(
                    "Command timed out after {} seconds",
                    timeout_secs
                )));
            }
        };

        let status =
            status.map_err(|e| ToolError::new(format!("Failed to wait for command: {}", e)))?;

        let mut result = combine(stdout, stderr);
        if result.is_empty() {
            result = "(no output)".to_string();
        }

        if status.success() {
            Ok(result)
        } else {
            let code = status.code().unwrap_or(-1);
            Err(ToolError::new(format!(
                "{}\n\nCommand exited with code {}",
                result, code
            )))
        }
    }
}
