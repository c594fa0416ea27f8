//! Configuration loading and validation.
//!
//! Two surfaces: the declarative agent document ([`schema`]) and the
//! environment-sourced model endpoints ([`environment`]). Both are resolved
//! once at process start; anything invalid fails there, never mid-run.

pub mod environment;
pub mod schema;

pub use environment::EnvironmentLoader;
pub use schema::{
    AgentConfig, AgentDocument, ContextEditSpec, DelegationPolicy, MiddlewareSpec,
};

use thiserror::Error;

/// Errors surfaced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration io error: {0}")]
    Io(String),

    #[error("configuration parse error: {0}")]
    Parse(String),

    #[error("configuration validation error: {0}")]
    Validation(String),

    #[error("required environment variable {0} is not set")]
    MissingEnv(String),
}
