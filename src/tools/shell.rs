//! Terminal Command Tool
//!
//! Information Hiding:
//! - Command execution details (process spawning, output capture) hidden
//! - Timeout and output cap hidden from caller
//! - Failures come back as a failed `ToolResult`, never as an error

use super::{Tool, ToolMetadata, ToolParameter, ToolResult};
use crate::config::ToolsConfig;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

pub const COMMAND_TOOL_NAME: &str = "executeCommand";

/// Runs terminal commands as if typed into a shell
pub struct CommandTool {
    timeout_secs: u64,
    max_output_bytes: usize,
}

impl CommandTool {
    pub fn new(timeout_secs: u64, max_output_bytes: usize) -> Self {
        Self {
            timeout_secs,
            max_output_bytes,
        }
    }

    pub fn from_config(config: &ToolsConfig) -> Self {
        Self::new(config.command_timeout_secs, config.max_output_bytes)
    }

    fn capped(&self, bytes: &[u8]) -> String {
        let end = bytes.len().min(self.max_output_bytes);
        let mut text = String::from_utf8_lossy(&bytes[..end]).into_owned();
        if bytes.len() > self.max_output_bytes {
            text.push_str("\n[output truncated]");
        }
        text
    }
}

#[async_trait]
impl Tool for CommandTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            name: COMMAND_TOOL_NAME.to_string(),
            description: "Execute terminal commands as if opening a terminal and running them directly. Use this for any command-line operations.".to_string(),
            parameters: vec![ToolParameter {
                name: "command".to_string(),
                param_type: "string".to_string(),
                description: "The terminal command to execute".to_string(),
                required: true,
            }],
        }
    }

    fn validate(&self, args: &Value) -> Result<()> {
        let command = args["command"].as_str().ok_or_else(|| {
            anyhow::anyhow!("'command' parameter is required and must be a string")
        })?;

        if command.trim().is_empty() {
            return Err(anyhow::anyhow!("Command cannot be empty"));
        }

        Ok(())
    }

    async fn execute(&self, args: Value) -> Result<ToolResult> {
        self.validate(&args)?;
        let command = args["command"].as_str().unwrap_or_default();

        tracing::info!("[CommandTool] $ {}", command);

        let result = timeout(
            Duration::from_secs(self.timeout_secs),
            Command::new("sh")
                .arg("-c")
                .arg(command)
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => {
                let stdout = self.capped(&output.stdout);
                let stderr = self.capped(&output.stderr);

                if output.status.success() {
                    let text = if !stdout.is_empty() {
                        stdout
                    } else if !stderr.is_empty() {
                        stderr
                    } else {
                        "Command completed".to_string()
                    };
                    Ok(ToolResult::success(text))
                } else {
                    let exit_code = output.status.code().unwrap_or(1);
                    tracing::warn!("[CommandTool] Command failed with exit code {}", exit_code);
                    let text = if !stdout.is_empty() { stdout } else { stderr };
                    Ok(ToolResult::failure(
                        text,
                        exit_code,
                        format!("Command failed with exit code {}", exit_code),
                    ))
                }
            }
            Ok(Err(e)) => Ok(ToolResult::failure(
                String::new(),
                1,
                format!("Failed to execute command: {}", e),
            )),
            Err(_) => Ok(ToolResult::failure(
                String::new(),
                1,
                format!("Command timed out after {} seconds", self.timeout_secs),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_command_success() {
        let tool = CommandTool::new(5, 1024);
        let result = tool
            .execute(json!({"command": "echo 'Hello, World!'"}))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.exit_code, 0);
        assert!(result.output.contains("Hello, World!"));
    }

    #[tokio::test]
    async fn test_silent_command_reports_completion() {
        let tool = CommandTool::new(5, 1024);
        let result = tool.execute(json!({"command": "true"})).await.unwrap();

        assert!(result.success);
        assert_eq!(result.output, "Command completed");
    }

    #[tokio::test]
    async fn test_command_failure_keeps_output_and_code() {
        let tool = CommandTool::new(5, 1024);
        let result = tool
            .execute(json!({"command": "echo oops >&2; exit 3"}))
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.exit_code, 3);
        assert!(result.output.contains("oops"));
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let tool = CommandTool::new(1, 1024);
        let result = tool.execute(json!({"command": "sleep 5"})).await.unwrap();

        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let tool = CommandTool::new(5, 4);
        let result = tool.execute(json!({"command": "echo abcdefgh"})).await.unwrap();

        assert!(result.output.starts_with("abcd"));
        assert!(result.output.ends_with("[output truncated]"));
    }

    #[tokio::test]
    async fn test_missing_command_is_rejected() {
        let tool = CommandTool::new(5, 1024);
        assert!(tool.execute(json!({})).await.is_err());
        assert!(tool.execute(json!({"command": "  "})).await.is_err());
    }
}
