//! Knowledge-base filesystem tools routed through the composite backend.

use super::{render_tool_output, Tool, ToolError, ToolSchema};
use crate::backend::CompositeBackend;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct PathArgs {
    path: String,
}

/// Read a file from a routed backend.
#[derive(Clone)]
pub struct ReadFileTool {
    backend: Arc<CompositeBackend>,
}

impl ReadFileTool {
    pub fn new(backend: Arc<CompositeBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "read_file".to_string(),
            description: "Read a file from the knowledge base. Use `ls` first to pick the most \
                          relevant files for the vulnerability under test."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Logical path, e.g. /knowledge_base/web/sqli.md"}
                },
                "required": ["path"]
            }),
        }
    }

    async fn invoke(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let args: PathArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let path = self.backend.resolve(&args.path)?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::Execution(format!("failed to read {}: {}", args.path, e)))?;
        Ok(render_tool_output(content))
    }
}

/// List directory entries from a routed backend.
#[derive(Clone)]
pub struct ListFilesTool {
    backend: Arc<CompositeBackend>,
}

impl ListFilesTool {
    pub fn new(backend: Arc<CompositeBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "ls"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "ls".to_string(),
            description: "List entries under a knowledge-base directory.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Logical directory path"}
                },
                "required": ["path"]
            }),
        }
    }

    async fn invoke(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let args: PathArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let path = self.backend.resolve(&args.path)?;
        let mut entries = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| ToolError::Execution(format!("failed to list {}: {}", args.path, e)))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?
        {
            let mut name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            names.push(name);
        }
        names.sort();
        Ok(names.join("\n"))
    }
}
