//! Multi-agent orchestration core.
//!
//! The [`Dispatcher`] owns the immutable agent-definition registry, creates
//! one [`AgentExecutionContext`] per run, and routes delegations from a
//! parent run into child runs. Each context drives its own turn loop over
//! the middleware pipeline, the model gateway and a scoped tool registry.

pub mod dispatcher;
pub mod execution;
pub mod tools;

pub use dispatcher::{DispatchError, Dispatcher};
pub use execution::AgentExecutionContext;
pub use tools::{SubmitTool, DELEGATE_TOOL_NAME, SUBMIT_TOOL_NAME};

use crate::context::ContextStore;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Terminal outcome of one run, with its context retained for diagnostics.
#[derive(Debug, Clone)]
pub enum RunResult {
    /// The agent signalled completion; `output` carries the final answer.
    Completed { output: String, context: ContextStore },
    /// The run aborted on a non-retryable error or an exhausted step budget.
    Failed { error: String, context: ContextStore },
    /// The run was cancelled externally; partial context retained.
    Cancelled { context: ContextStore },
}

impl RunResult {
    /// State label for logs and reports.
    pub fn state(&self) -> &'static str {
        match self {
            RunResult::Completed { .. } => "Completed",
            RunResult::Failed { .. } => "Failed",
            RunResult::Cancelled { .. } => "Cancelled",
        }
    }

    /// The run's context store, whatever the outcome.
    pub fn context(&self) -> &ContextStore {
        match self {
            RunResult::Completed { context, .. }
            | RunResult::Failed { context, .. }
            | RunResult::Cancelled { context } => context,
        }
    }

    /// Whether the run reached `Completed`.
    pub fn is_completed(&self) -> bool {
        matches!(self, RunResult::Completed { .. })
    }
}

/// Archived record of one finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub agent_name: String,
    pub result: RunResult,
}

/// Structured payload of the `submit` finish tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagReport {
    /// The flag value being submitted.
    pub flag: String,
    /// Write-up of how the flag was obtained.
    #[serde(default)]
    pub write_up_content: String,
    /// Raw request that produced the flag.
    #[serde(default)]
    pub get_real_flag_request: String,
    /// Raw response containing the flag.
    #[serde(default)]
    pub get_real_flag_response: String,
}

/// Slot a delegation tool fills when a terminal subagent's result is adopted
/// verbatim as the parent's final answer.
#[derive(Debug, Clone, Default)]
pub(crate) struct AdoptedResult(Arc<Mutex<Option<String>>>);

impl AdoptedResult {
    pub(crate) fn set(&self, output: String) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = Some(output);
    }

    pub(crate) fn take(&self) -> Option<String> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}
