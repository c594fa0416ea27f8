//! Logging system for agent runs.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Logger for dispatcher and run events.
///
/// Creates a markdown-formatted log file tracking run lifecycles, model
/// turns, tool executions and delegations. Writes are append-only, so one
/// logger can be shared across concurrent runs.
#[derive(Debug, Clone)]
pub struct Logger {
    log_file: PathBuf,
}

impl Logger {
    /// Initialize logger.
    ///
    /// # Arguments
    /// * `log_file` - Path to log file. If None, creates a timestamped file in temp directory.
    pub fn new(log_file: Option<&Path>) -> Result<Self> {
        let log_file = match log_file {
            Some(p) => p.to_path_buf(),
            None => {
                let mut dir = std::env::temp_dir();
                dir.push("oak-logs");
                std::fs::create_dir_all(&dir).with_context(|| {
                    format!("Failed to create log directory: {}", dir.display())
                })?;
                let filename = format!(
                    "run_{}_{}.md",
                    Utc::now().timestamp_millis(),
                    std::process::id()
                );
                dir.join(filename)
            }
        };

        if let Some(parent) = log_file.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
        }

        let logger = Self { log_file };
        if !logger.log_file.exists() {
            logger.initialize_log_file()?;
        }
        Ok(logger)
    }

    fn initialize_log_file(&self) -> Result<()> {
        let mut file = File::create(&self.log_file)
            .with_context(|| format!("Failed to create log file: {}", self.log_file.display()))?;

        let now: DateTime<Utc> = Utc::now();
        writeln!(file, "# Agent Run Log\n")?;
        writeln!(file, "Log started: {}\n", now.to_rfc3339())?;
        writeln!(file, "---\n")?;
        Ok(())
    }

    fn append_to_log(&self, content: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)
            .with_context(|| format!("Failed to open log file: {}", self.log_file.display()))?;

        write!(file, "{}", content).with_context(|| "Failed to write to log file")?;
        Ok(())
    }

    /// Log run start.
    pub fn log_run_start(&self, run_id: &str, agent_name: &str, task: &str) -> Result<()> {
        let now: DateTime<Utc> = Utc::now();
        let content = format!(
            "## Run Started - {}\n\n**Run:** {}\n**Agent:** {}\n**Task:**\n```\n{}\n```\n\n",
            now.to_rfc3339(),
            run_id,
            agent_name,
            task
        );
        self.append_to_log(&content)?;
        println!("INFO: Run {} started for agent '{}'", run_id, agent_name);
        Ok(())
    }

    /// Log one model turn's response.
    pub fn log_model_turn(&self, run_id: &str, model: &str, response: &str) -> Result<()> {
        if response.trim().is_empty() {
            return Ok(());
        }
        let now: DateTime<Utc> = Utc::now();
        let content = format!(
            "### Model Turn - {}\n\n**Run:** {}\n**Model:** {}\n\n**Response:**\n```\n{}\n```\n\n",
            now.to_rfc3339(),
            run_id,
            model,
            response
        );
        self.append_to_log(&content)
    }

    /// Log tool execution with its result.
    pub fn log_tool_execution(
        &self,
        run_id: &str,
        tool_name: &str,
        tool_args: &str,
        result: &str,
        success: bool,
    ) -> Result<()> {
        let now: DateTime<Utc> = Utc::now();
        let status = if success { "Result" } else { "Error" };
        let content = format!(
            "### Tool Execution - {}\n\n**Run:** {}\n**Tool:** {}\n**Args:** {}\n**{}:** {}\n\n",
            now.to_rfc3339(),
            run_id,
            tool_name,
            tool_args,
            status,
            result
        );
        self.append_to_log(&content)
    }

    /// Log a delegation from a parent run to a subagent.
    pub fn log_delegation(&self, parent_run: &str, subagent: &str, task: &str) -> Result<()> {
        let now: DateTime<Utc> = Utc::now();
        let content = format!(
            "### Delegation - {}\n\n**Parent Run:** {}\n**Subagent:** {}\n**Task:**\n```\n{}\n```\n\n",
            now.to_rfc3339(),
            parent_run,
            subagent,
            task
        );
        self.append_to_log(&content)?;
        println!("INFO: Run {} delegated to '{}'", parent_run, subagent);
        Ok(())
    }

    /// Log run completion with its terminal state.
    pub fn log_run_end(&self, run_id: &str, state: &str, summary: &str) -> Result<()> {
        let now: DateTime<Utc> = Utc::now();
        let content = format!(
            "### Run Ended - {}\n\n**Run:** {}\n**State:** {}\n**Summary:** {}\n\n---\n\n",
            now.to_rfc3339(),
            run_id,
            state,
            summary
        );
        self.append_to_log(&content)?;
        println!("INFO: Run {} ended: {}", run_id, state);
        Ok(())
    }

    /// Log error with run context.
    pub fn log_error(&self, run_id: &str, error: &str) -> Result<()> {
        let now: DateTime<Utc> = Utc::now();
        let content = format!(
            "### Error - {}\n\n**Run:** {}\n**Error:** {}\n\n",
            now.to_rfc3339(),
            run_id,
            error
        );
        self.append_to_log(&content)?;
        eprintln!("ERROR: run {}: {}", run_id, error);
        Ok(())
    }

    /// Get the log file path.
    pub fn log_file(&self) -> &Path {
        &self.log_file
    }
}
