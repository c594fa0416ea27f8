//! Oak (Orchestrated Agent Kit) - a multi-agent orchestration runtime
//!
//! Oak coordinates a main controller agent and a set of declaratively
//! defined specialist subagents, each wrapping an LLM-driven task loop:
//!
//! - **`config`** - Declarative agent documents and environment loading
//! - **`gateway`** - Uniform model endpoint interface with failure classification
//! - **`context`** - Per-run conversation stores and the durable notes log
//! - **`middleware`** - Interceptor pipeline: fallback, notes, context editing
//! - **`tools`** - Tool registry, permission scoping and built-in tools
//! - **`backend`** - Sandboxed filesystem routing for knowledge-base tools
//! - **`orchestration`** - Dispatcher, execution contexts and delegation
//! - **`observability`** - Markdown run logging
//!
//! # Example
//!
//! ```ignore
//! use oak::config::{AgentDocument, EnvironmentLoader};
//! use oak::gateway::OpenAiGateway;
//! use oak::observability::Logger;
//! use oak::orchestration::Dispatcher;
//! use oak::tools::{CurlTool, ToolRegistry};
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let document = AgentDocument::from_file("agents.yaml")?;
//! let endpoints = EnvironmentLoader::new(None).model_endpoints()?;
//!
//! let mut registry = ToolRegistry::new();
//! registry.register(Arc::new(CurlTool::new()));
//!
//! let dispatcher = Dispatcher::new(
//!     &document,
//!     Arc::new(registry),
//!     Arc::new(OpenAiGateway::new()),
//!     endpoints,
//!     Logger::new(None)?,
//! )?;
//!
//! let result = dispatcher.run_main("Assess http://target and find the flag").await;
//! println!("run ended: {}", result.state());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod context;
pub mod gateway;
pub mod middleware;
pub mod observability;
pub mod orchestration;
pub mod tools;

/// Common imports for building and running agents.
pub mod prelude {
    pub use crate::config::{AgentDocument, ConfigError, EnvironmentLoader};
    pub use crate::context::{ContextStore, NotesLog, Turn};
    pub use crate::gateway::{ModelEndpointConfig, ModelGateway, OpenAiGateway};
    pub use crate::observability::Logger;
    pub use crate::orchestration::{Dispatcher, RunReport, RunResult};
    pub use crate::tools::{Tool, ToolRegistry};
}

pub use orchestration::{RunReport, RunResult};
