//! Declarative agent configuration schema.
//!
//! Defines the TOML/YAML/JSON structure for agent documents: the main agent,
//! its subagents, middleware chains and filesystem routes. Documents are
//! loaded once at startup, validated, and treated as immutable afterwards.

use super::ConfigError;
use crate::backend::FilesystemBackendConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Root document supplying everything the dispatcher needs at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDocument {
    /// Main agent definition.
    pub agent: AgentConfig,

    /// Subagents available for delegation.
    #[serde(default)]
    pub subagents: Vec<AgentConfig>,

    /// Filesystem routes exposed through the knowledge-base tools.
    #[serde(default)]
    pub filesystem: Vec<FilesystemBackendConfig>,

    /// Schema version (for future migrations)
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "1".to_string()
}

/// One agent role: the main agent or a named subagent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent name; delegation targets subagents by this name.
    pub name: String,

    /// Description shown to the parent when delegating.
    #[serde(default)]
    pub description: String,

    /// System prompt for every turn of this agent.
    pub system_prompt: String,

    /// Names of registry tools this agent may invoke.
    #[serde(default)]
    pub tools: Vec<String>,

    /// Middleware chain in composition order.
    #[serde(default)]
    pub middleware: Vec<MiddlewareSpec>,

    /// How a parent adopts this agent's delegation result.
    #[serde(default)]
    pub delegation_policy: DelegationPolicy,

    /// Step budget; the run fails once exhausted.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
}

fn default_max_steps() -> u32 {
    50
}

/// How a delegation result flows back into the parent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationPolicy {
    /// The result is appended as a tool result for the parent to reason over.
    #[default]
    ToolResult,
    /// The result is adopted verbatim as the parent's final answer.
    AdoptVerbatim,
}

/// Declarative middleware entry, tagged by kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MiddlewareSpec {
    /// Primary/backup endpoint fallback.
    ModelFallback {
        #[serde(default = "default_backup_retries")]
        backup_retries: u32,
    },
    /// Durable note-taking via `write_important_notes`.
    ImportantNotes,
    /// Ordered context-edit policies.
    ContextEditing {
        #[serde(default)]
        edits: Vec<ContextEditSpec>,
    },
}

fn default_backup_retries() -> u32 {
    1
}

/// Declarative context-edit policy, tagged by kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextEditSpec {
    /// Reminder injection after long uninterrupted tool chains.
    LongChainWakeUp {
        max_consecutive_counts: u32,
        #[serde(default = "default_important_tool")]
        important_tool_name: String,
        #[serde(default)]
        exclude_tools: Vec<String>,
    },
    /// Oldest-first eviction of tool results past a token threshold.
    ClearToolUses {
        trigger_tokens: usize,
        #[serde(default = "default_keep")]
        keep: usize,
        #[serde(default)]
        exclude_tools: Vec<String>,
    },
}

fn default_important_tool() -> String {
    "write_important_notes".to_string()
}

fn default_keep() -> usize {
    3
}

impl AgentDocument {
    /// Load from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let document: AgentDocument = toml::from_str(content)
            .map_err(|e| ConfigError::Parse(format!("failed to parse TOML: {}", e)))?;
        document.validate()?;
        Ok(document)
    }

    /// Load from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let document: AgentDocument = serde_yaml::from_str(content)
            .map_err(|e| ConfigError::Parse(format!("failed to parse YAML: {}", e)))?;
        document.validate()?;
        Ok(document)
    }

    /// Load from a JSON string.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let document: AgentDocument = serde_json::from_str(content)
            .map_err(|e| ConfigError::Parse(format!("failed to parse JSON: {}", e)))?;
        document.validate()?;
        Ok(document)
    }

    /// Auto-detect format from the file extension and load.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Io(format!("failed to read {}: {}", path.display(), e))
        })?;
        match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => Self::from_toml(&content),
            Some("json") => Self::from_json(&content),
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            _ => Self::from_yaml(&content)
                .or_else(|_| Self::from_toml(&content))
                .or_else(|_| Self::from_json(&content)),
        }
    }

    /// Structural validation; tool-name resolution happens at dispatcher
    /// build, where the registry is known.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for agent in std::iter::once(&self.agent).chain(self.subagents.iter()) {
            if agent.name.is_empty() {
                return Err(ConfigError::Validation("agent name must not be empty".into()));
            }
            if !names.insert(agent.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate agent name '{}'",
                    agent.name
                )));
            }
            if agent.system_prompt.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "agent '{}' has an empty system prompt",
                    agent.name
                )));
            }
            if agent.max_steps == 0 {
                return Err(ConfigError::Validation(format!(
                    "agent '{}': max_steps must be > 0",
                    agent.name
                )));
            }
            agent.validate_middleware()?;
        }

        for route in &self.filesystem {
            if !route.route.starts_with('/') || !route.route.ends_with('/') {
                return Err(ConfigError::Validation(format!(
                    "filesystem route '{}' must start and end with '/'",
                    route.route
                )));
            }
        }
        Ok(())
    }
}

impl AgentConfig {
    fn validate_middleware(&self) -> Result<(), ConfigError> {
        for spec in &self.middleware {
            match spec {
                MiddlewareSpec::ModelFallback { backup_retries } => {
                    if *backup_retries == 0 {
                        return Err(ConfigError::Validation(format!(
                            "agent '{}': backup_retries must be > 0",
                            self.name
                        )));
                    }
                }
                MiddlewareSpec::ImportantNotes => {}
                MiddlewareSpec::ContextEditing { edits } => {
                    for edit in edits {
                        match edit {
                            ContextEditSpec::LongChainWakeUp {
                                max_consecutive_counts,
                                ..
                            } if *max_consecutive_counts == 0 => {
                                return Err(ConfigError::Validation(format!(
                                    "agent '{}': max_consecutive_counts must be > 0",
                                    self.name
                                )));
                            }
                            ContextEditSpec::ClearToolUses { trigger_tokens, .. }
                                if *trigger_tokens == 0 =>
                            {
                                return Err(ConfigError::Validation(format!(
                                    "agent '{}': trigger_tokens must be > 0",
                                    self.name
                                )));
                            }
                            _ => {}
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
