//! Filesystem backend routing.
//!
//! A backend maps a logical route prefix (as seen by agents, e.g.
//! `/knowledge_base/`) to a root directory on disk. With virtual mode
//! enabled, path resolution is confined to that root and escape attempts
//! fail with a path-escape error; otherwise resolution is direct.

use crate::tools::ToolError;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Declarative mapping for one filesystem route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemBackendConfig {
    /// Logical route prefix, e.g. `/knowledge_base/`.
    pub route: String,
    /// Root directory backing the route.
    pub root_dir: PathBuf,
    /// Confine resolution to `root_dir` when set.
    #[serde(default)]
    pub virtual_mode: bool,
}

/// One route's resolver.
#[derive(Debug, Clone)]
pub struct FilesystemBackend {
    root: PathBuf,
    virtual_mode: bool,
}

impl FilesystemBackend {
    /// Create a backend over a root directory.
    pub fn new(root: impl Into<PathBuf>, virtual_mode: bool) -> Self {
        Self {
            root: root.into(),
            virtual_mode,
        }
    }

    /// Resolve a route-relative path to a real filesystem path.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, ToolError> {
        if !self.virtual_mode {
            return Ok(self.root.join(relative.trim_start_matches('/')));
        }

        // Lexical normalization: the target may not exist yet, so
        // canonicalization is not an option.
        let mut normalized = PathBuf::new();
        for component in Path::new(relative.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => normalized.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(ToolError::PathEscape(relative.to_string()));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(ToolError::PathEscape(relative.to_string()));
                }
            }
        }
        Ok(self.root.join(normalized))
    }
}

/// Routes logical paths to per-prefix backends, longest prefix first.
#[derive(Debug, Clone, Default)]
pub struct CompositeBackend {
    routes: Vec<(String, FilesystemBackend)>,
}

impl CompositeBackend {
    /// Build from declarative route configs.
    pub fn from_configs(configs: &[FilesystemBackendConfig]) -> Self {
        let mut routes: Vec<(String, FilesystemBackend)> = configs
            .iter()
            .map(|config| {
                (
                    config.route.clone(),
                    FilesystemBackend::new(&config.root_dir, config.virtual_mode),
                )
            })
            .collect();
        routes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { routes }
    }

    /// Resolve a logical path through its matching route.
    pub fn resolve(&self, logical: &str) -> Result<PathBuf, ToolError> {
        for (route, backend) in &self.routes {
            if let Some(rest) = logical.strip_prefix(route.as_str()) {
                return backend.resolve(rest);
            }
        }
        Err(ToolError::Execution(format!(
            "no filesystem route matches '{}'",
            logical
        )))
    }

    /// Whether any routes are configured.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
