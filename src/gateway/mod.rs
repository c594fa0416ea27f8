//! Model gateway abstraction.
//!
//! The gateway is the uniform "complete a turn" interface over interchangeable
//! model backends. Failures carry a fixed retryable/fatal classification that
//! the fallback middleware consumes: timeouts, rate limits and malformed
//! responses may be retried against a backup endpoint; credential and
//! configuration failures may not.

pub mod openai;

pub use openai::OpenAiGateway;

use crate::context::Turn;
use crate::tools::ToolSchema;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified gateway failure.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Request to the endpoint timed out.
    #[error("model request timed out")]
    Timeout,

    /// Endpoint rejected the request due to rate limiting.
    #[error("model endpoint rate limited")]
    RateLimited,

    /// Endpoint returned a body that could not be decoded.
    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    /// Endpoint rejected the configured credentials.
    #[error("model endpoint rejected credentials")]
    Unauthorized,

    /// Any other endpoint-reported failure.
    #[error("model endpoint error: {0}")]
    Endpoint(String),

    /// Primary and backup endpoints are both exhausted; run-fatal.
    #[error("all model endpoints exhausted: {0}")]
    ModelUnavailable(String),
}

impl GatewayError {
    /// Whether the fallback middleware may retry this failure on a backup
    /// endpoint.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Timeout | GatewayError::RateLimited | GatewayError::MalformedResponse(_)
        )
    }
}

/// Connection parameters for one model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEndpoint {
    /// Base URL of an OpenAI-compatible API.
    pub base_url: String,
    /// Bearer token.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
}

/// Primary/backup endpoint pair. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEndpointConfig {
    pub primary: ModelEndpoint,
    pub backup: ModelEndpoint,
}

/// One "produce a turn" request assembled from a context store.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// System prompt; middleware may extend it before dispatch.
    pub system_prompt: String,
    /// Ordered turn history.
    pub turns: Vec<Turn>,
    /// Per-request temperature override; endpoint default when `None`.
    pub temperature: Option<f32>,
    /// Schemas of the tools available this turn.
    pub tools: Vec<ToolSchema>,
    /// Endpoint selected by fallback middleware; the terminal caller falls
    /// back to its own default endpoint when `None`.
    pub endpoint_override: Option<ModelEndpoint>,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    /// Endpoint-assigned call identifier.
    pub id: String,
    /// Requested tool name.
    pub name: String,
    /// Arguments, already parsed from the wire format.
    pub arguments: serde_json::Value,
}

/// Model response: content and/or requested tool calls.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ChatResponse {
    /// Content-only response, convenient for tests and synthetic replies.
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }
}

/// Uniform interface to a model backend.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Complete one turn against the given endpoint.
    async fn invoke(
        &self,
        endpoint: &ModelEndpoint,
        request: &TurnRequest,
    ) -> Result<ChatResponse, GatewayError>;

    /// Gateway identifier for logging.
    fn name(&self) -> &str;
}
