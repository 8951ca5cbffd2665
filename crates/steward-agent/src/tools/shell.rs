//! `shell` tool — one-shot command execution. Classified as a write action
//! by the policy gate.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use super::{Tool, ToolOutcome};

const SHELL_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_OUTPUT_CHARS: usize = 8000;

pub struct ShellTool;

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a one-shot shell command and return stdout/stderr. Use for \
         local lookups and file operations, not long-running processes."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Command line to run via sh -c."
                }
            },
            "required": ["command"]
        })
    }

    fn timeout(&self) -> Duration {
        SHELL_TIMEOUT
    }

    async fn execute(&self, input: Value) -> ToolOutcome {
        let Some(command) = input.get("command").and_then(Value::as_str) else {
            return ToolOutcome::failure("'command' is required");
        };

        let output = match Command::new("sh").arg("-c").arg(command).output().await {
            Ok(o) => o,
            Err(e) => return ToolOutcome::failure(format!("spawn failed: {e}")),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut text = stdout.into_owned();
        if !stderr.is_empty() {
            text.push_str("\n[stderr]\n");
            text.push_str(&stderr);
        }
        let text: String = text.chars().take(MAX_OUTPUT_CHARS).collect();

        if output.status.success() {
            ToolOutcome::success(text)
        } else {
            ToolOutcome::failure(format!(
                "exit {}: {}",
                output.status.code().unwrap_or(-1),
                text
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout() {
        let outcome = ShellTool.execute(json!({"command": "echo steward"})).await;
        assert!(outcome.success);
        assert!(outcome.output.unwrap().contains("steward"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure() {
        let outcome = ShellTool.execute(json!({"command": "exit 3"})).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("exit 3"));
    }
}
