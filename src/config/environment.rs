//! Environment variable loading for model endpoints.
//!
//! Endpoint credentials never live in the declarative document; they are
//! read from the process environment (optionally seeded from a .env file)
//! at startup. Missing required variables fail startup, not runtime.

use super::ConfigError;
use crate::gateway::{ModelEndpoint, ModelEndpointConfig};
use std::env;
use std::path::Path;

const DEFAULT_TEMPERATURE: f32 = 0.5;

/// Loads environment variables from a .env file and the system environment.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentLoader {
    env_file: Option<String>,
}

impl EnvironmentLoader {
    /// Initialize the environment loader.
    ///
    /// Only loads a .env file when an explicit path was provided. This avoids
    /// picking up repository or system .env files during unit tests which
    /// expect the plain process environment.
    pub fn new(env_file: Option<&Path>) -> Self {
        if let Some(path) = env_file {
            if path.exists() {
                if let Err(e) = dotenv::from_path(path) {
                    eprintln!("Warning: failed to load .env file: {}", e);
                }
            }
        }
        Self {
            env_file: env_file.map(|p| p.to_string_lossy().to_string()),
        }
    }

    /// Path of the loaded .env file, if any.
    pub fn env_file(&self) -> Option<&str> {
        self.env_file.as_deref()
    }

    /// Read the primary/backup endpoint pair.
    ///
    /// Primary variables are required; backup variables fall back to the
    /// primary values when absent, so a single-endpoint deployment still
    /// works with fallback middleware configured.
    pub fn model_endpoints(&self) -> Result<ModelEndpointConfig, ConfigError> {
        let primary = ModelEndpoint {
            base_url: require("MAIN_OPENAI_BASE_URL")?,
            api_key: require("MAIN_OPENAI_API_KEY")?,
            model: require("MAIN_OPENAI_MODEL")?,
            temperature: parse_temperature("MAIN_MODEL_TEMPERATURE")?,
        };
        let backup = ModelEndpoint {
            base_url: optional("BACKUP_OPENAI_BASE_URL").unwrap_or_else(|| primary.base_url.clone()),
            api_key: optional("BACKUP_OPENAI_API_KEY").unwrap_or_else(|| primary.api_key.clone()),
            model: optional("BACKUP_OPENAI_MODEL").unwrap_or_else(|| primary.model.clone()),
            temperature: parse_temperature("BACKUP_MODEL_TEMPERATURE")?,
        };
        Ok(ModelEndpointConfig { primary, backup })
    }
}

fn require(name: &str) -> Result<String, ConfigError> {
    optional(name).ok_or_else(|| ConfigError::MissingEnv(name.to_string()))
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

fn parse_temperature(name: &str) -> Result<f32, ConfigError> {
    match optional(name) {
        None => Ok(DEFAULT_TEMPERATURE),
        Some(raw) => raw.parse::<f32>().map_err(|_| {
            ConfigError::Validation(format!("{} must be a number, got '{}'", name, raw))
        }),
    }
}
