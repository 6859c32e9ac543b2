//! Shell command tool.

use async_trait::async_trait;
use proto::{ParamSpec, ParamType, ToolError, ToolResult};
use serde::Deserialize;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{Tool, parse_args};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_OUTPUT_CHARS: usize = 10_000;

#[derive(Debug, Deserialize)]
struct BashArgs {
    command: String,
}

/// Runs `bash -c <command>` with a fixed timeout.
///
/// Exit code 0 yields stdout (or a placeholder when empty); any other exit
/// yields an error-shaped result carrying stderr, falling back to stdout.
pub struct BashTool {
    timeout: Duration,
}

impl BashTool {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT_SECS)
    }

    pub fn with_timeout(secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(secs),
        }
    }

    async fn run(&self, command: &str) -> Result<String, ToolError> {
        debug!("Executing bash command: {command}");

        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(command);
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let output = match timeout(self.timeout, cmd.output()).await {
            Ok(output) => output?,
            Err(_) => {
                warn!("Bash command timed out after {}s: {command}", self.timeout.as_secs());
                return Err(ToolError::Timeout(self.timeout.as_secs()));
            }
        };

        let stdout = truncate_str(String::from_utf8_lossy(&output.stdout).trim(), MAX_OUTPUT_CHARS);
        let stderr = truncate_str(String::from_utf8_lossy(&output.stderr).trim(), MAX_OUTPUT_CHARS);
        match output.status.code() {
            Some(0) if stdout.is_empty() => Ok("Command executed successfully (no output)".to_string()),
            Some(0) => Ok(stdout),
            code => {
                let detail = if stderr.is_empty() { stdout } else { stderr };
                Err(ToolError::ExecutionFailed(format!(
                    "exit code {}: {detail}",
                    code.unwrap_or(-1)
                )))
            }
        }
    }
}

impl Default for BashTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash_command"
    }

    fn description(&self) -> &str {
        "Execute bash commands in a shell. Returns stdout on success. \
         Output is limited to 10,000 characters. Timeout is 30 seconds."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![ParamSpec::required(
            "command",
            ParamType::String,
            "The bash command to execute",
        )]
    }

    async fn execute(&self, call_id: &str, args: serde_json::Value) -> ToolResult {
        let result = match parse_args::<BashArgs>(args) {
            Ok(a) => self.run(&a.command).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(text) => ToolResult::success(call_id, self.name(), text),
            Err(e) => ToolResult::error(call_id, self.name(), e.to_string()),
        }
    }
}

/// Truncates UTF-8 text to `max_chars` code points and appends a suffix when truncated.
fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{truncated}\n[... output truncated at {max_chars} chars]")
    }
}
