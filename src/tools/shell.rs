//! Subprocess execution tool with timeout handling.

use super::{render_tool_output, Tool, ToolError, ToolSchema};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;

const DEFAULT_TIMEOUT_SECONDS: u64 = 180;

#[derive(Debug, Deserialize)]
struct CommandArgs {
    command: String,
    #[serde(default)]
    timeout_seconds: Option<u64>,
}

/// Executes shell commands with a timeout, for driving local assessment
/// tooling (scanners, interpreters, one-off scripts).
#[derive(Debug, Clone)]
pub struct CommandTool {
    timeout_seconds: u64,
    working_dir: PathBuf,
    enable_validation: bool,
}

impl CommandTool {
    /// Initialize the tool.
    ///
    /// # Arguments
    /// * `timeout_seconds` - Default timeout per command.
    /// * `working_dir` - Working directory for commands.
    pub fn new(timeout_seconds: u64, working_dir: Option<&Path>) -> Self {
        Self {
            timeout_seconds,
            working_dir: working_dir.unwrap_or(Path::new(".")).to_path_buf(),
            enable_validation: true,
        }
    }

    /// Validate command safety (basic checks).
    fn validate_command(&self, command: &str) -> Result<(), ToolError> {
        if !self.enable_validation {
            return Ok(());
        }
        let command = command.trim();
        if command.is_empty() {
            return Err(ToolError::InvalidArguments(
                "command cannot be empty".to_string(),
            ));
        }

        let dangerous_patterns = [
            "rm -rf /",
            "rm -rf *",
            "mkfs.",
            "dd if=",
            ":(){ :|:& };:", // Fork bomb
            "curl | sh",
            "wget | sh",
        ];
        let command_lower = command.to_lowercase();
        for pattern in &dangerous_patterns {
            if command_lower.contains(pattern) {
                return Err(ToolError::InvalidArguments(format!(
                    "potentially dangerous command detected: {}",
                    pattern
                )));
            }
        }
        Ok(())
    }
}

impl Default for CommandTool {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT_SECONDS, None)
    }
}

#[async_trait]
impl Tool for CommandTool {
    fn name(&self) -> &str {
        "execute_command"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "execute_command".to_string(),
            description: "Execute a shell command and return its stderr and stdout. Useful for \
                          batch HTTP probing, fuzzing helpers and local assessment tooling. \
                          Keep output focused on the relevant part."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "Complete shell command"},
                    "timeout_seconds": {
                        "type": "integer",
                        "description": "Per-command timeout override in seconds"
                    }
                },
                "required": ["command"]
            }),
        }
    }

    async fn invoke(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let args: CommandArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        self.validate_command(&args.command)?;

        let timeout_secs = args.timeout_seconds.unwrap_or(self.timeout_seconds);

        let mut cmd = TokioCommand::new("sh");
        cmd.arg("-c")
            .arg(&args.command)
            .current_dir(&self.working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null());

        match timeout(Duration::from_secs(timeout_secs), cmd.output()).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let return_code = output.status.code().unwrap_or(-1);
                let text = format!(
                    "exit code: {}\n\n{}\n\n{}",
                    return_code, stderr, stdout
                );
                Ok(render_tool_output(text))
            }
            Ok(Err(e)) => Err(ToolError::Execution(format!(
                "failed to execute command: {}",
                e
            ))),
            Err(_) => Err(ToolError::Execution(format!(
                "command timed out after {} seconds",
                timeout_secs
            ))),
        }
    }
}

/// Python one-liner execution tool.
///
/// Thin wrapper over [`CommandTool`] that only accepts `python ...`
/// invocations. Steers batch HTTP probing and output filtering into python
/// scripts instead of raw shell pipelines.
#[derive(Debug, Clone, Default)]
pub struct PythonCodeTool {
    command: CommandTool,
}

impl PythonCodeTool {
    pub fn new(command: CommandTool) -> Self {
        Self { command }
    }
}

#[async_trait]
impl Tool for PythonCodeTool {
    fn name(&self) -> &str {
        "execute_python_code_command"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "execute_python_code_command".to_string(),
            description: "Execute a complete python command, e.g. python -c 'print(\"hello\")'. \
                          Prefer this for batch HTTP requests (multi-path fuzzing, multi-payload \
                          testing) and print only the key part of the output."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "Complete python command, starting with `python`"
                    },
                    "timeout_seconds": {
                        "type": "integer",
                        "description": "Per-command timeout override in seconds"
                    }
                },
                "required": ["command"]
            }),
        }
    }

    async fn invoke(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let args: CommandArgs = serde_json::from_value(arguments.clone())
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        if !args.command.trim_start().starts_with("python") {
            return Err(ToolError::InvalidArguments(
                "command must start with \"python\", e.g. python -c 'print(\"hello\")'".to_string(),
            ));
        }
        self.command.invoke(arguments).await
    }
}
