//! Tool abstraction and registries.
//!
//! Tools are opaque to the orchestration core beyond name-based permission
//! scoping: a [`ToolRegistry`] holds every capability known to the process,
//! and each agent run sees only a [`ScopedRegistry`] restricted to the names
//! its definition lists. Scope violations fail with
//! [`ToolError::NotPermitted`] before the global registry is ever consulted.

pub mod fs;
pub mod http;
pub mod shell;

pub use fs::{ListFilesTool, ReadFileTool};
pub use http::CurlTool;
pub use shell::{CommandTool, PythonCodeTool};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// Ceiling on tool output fed back to the model, in characters.
const MAX_OUTPUT_CHARS: usize = 40_000;
/// Prefix kept when output exceeds the ceiling.
const TRUNCATED_OUTPUT_CHARS: usize = 20_000;

/// Tool invocation failure.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    /// The agent's definition does not list this tool.
    #[error("tool '{0}' is not permitted for this agent")]
    NotPermitted(String),

    /// No tool with this name exists in the registry.
    #[error("unknown tool: {0}")]
    Unknown(String),

    /// Arguments failed to parse or validate.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// Path resolution escaped a sandboxed backend root.
    #[error("path escapes backend root: {0}")]
    PathEscape(String),

    /// Tool-reported failure; recorded, the run continues.
    #[error("{0}")]
    Execution(String),

    /// Tool-reported failure that must terminate the run.
    #[error("fatal tool failure: {0}")]
    Fatal(String),
}

impl ToolError {
    /// Whether this failure terminates the owning run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ToolError::Fatal(_))
    }
}

/// JSON-schema description of a tool, advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// A named external capability.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable tool name used for permission scoping.
    fn name(&self) -> &str;

    /// Schema advertised to the model.
    fn schema(&self) -> ToolSchema;

    /// Invoke with parsed arguments, returning the text fed back to the model.
    async fn invoke(&self, arguments: serde_json::Value) -> Result<String, ToolError>;
}

/// Global registry of every tool known to the process.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its own name, replacing any previous entry.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Whether a tool with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// All registered tool names.
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }
}

/// Per-run view of the registry restricted to an agent's tool names.
///
/// Extra tools (middleware-provided note writers, the delegation tool) are
/// attached directly to the view and are always permitted for its run.
#[derive(Clone)]
pub struct ScopedRegistry {
    registry: Arc<ToolRegistry>,
    allowed: HashSet<String>,
    extra: HashMap<String, Arc<dyn Tool>>,
}

impl ScopedRegistry {
    /// Create a view allowing only the named registry tools.
    pub fn new(registry: Arc<ToolRegistry>, allowed: impl IntoIterator<Item = String>) -> Self {
        Self {
            registry,
            allowed: allowed.into_iter().collect(),
            extra: HashMap::new(),
        }
    }

    /// Attach a run-scoped tool that bypasses the allow list.
    pub fn attach(&mut self, tool: Arc<dyn Tool>) {
        self.extra.insert(tool.name().to_string(), tool);
    }

    /// Schemas of every tool visible to this run.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .allowed
            .iter()
            .filter_map(|name| self.registry.get(name))
            .map(|tool| tool.schema())
            .collect();
        schemas.extend(self.extra.values().map(|tool| tool.schema()));
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Invoke a tool by name, enforcing the scope before any registry lookup.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<String, ToolError> {
        if let Some(tool) = self.extra.get(name) {
            return tool.invoke(arguments).await;
        }
        if !self.allowed.contains(name) {
            return Err(ToolError::NotPermitted(name.to_string()));
        }
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        tool.invoke(arguments).await
    }
}

fn flag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(flag\{[^}]*\}|FLAG\{[^}]*\}|Flag\{[^}]*\})").expect("static pattern")
    })
}

/// Extract flag-like patterns from arbitrary text.
pub(crate) fn find_flags(text: &str) -> Vec<String> {
    flag_regex()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Cap oversized tool output and surface any flag-like matches up front.
pub(crate) fn render_tool_output(text: String) -> String {
    let flags = find_flags(&text);
    let mut output = if text.chars().count() > MAX_OUTPUT_CHARS {
        let truncated: String = text.chars().take(TRUNCATED_OUTPUT_CHARS).collect();
        format!(
            "{}\n\n... (output too large, truncated; narrow the request to extract the useful part)",
            truncated
        )
    } else {
        text
    };
    if !flags.is_empty() {
        output = format!(
            "# Important finding\nPossible flag content in this output - verify it:\n{}\n\n{}",
            flags.join("\n"),
            output
        );
    }
    output
}
