//! Primary/backup model fallback.

use super::{ModelCaller, TurnMiddleware};
use crate::gateway::{ChatResponse, GatewayError, ModelEndpointConfig, TurnRequest};
use async_trait::async_trait;

/// Wraps the model-invocation step with a stateless primary-then-backup
/// policy.
///
/// Each turn independently attempts the primary endpoint; a retryable
/// failure (timeout, rate limit, malformed response) is retried against the
/// backup endpoint up to `backup_retries` times. Every attempt is delegated
/// through the rest of the chain with an endpoint override on the request,
/// so interceptors declared after this one still see each attempt.
/// Non-retryable failures propagate unchanged, and exhausting both endpoints
/// yields [`GatewayError::ModelUnavailable`], which is run-fatal. No state
/// is kept across turns; this is a fallback, not a circuit breaker.
pub struct ModelFallbackMiddleware {
    endpoints: ModelEndpointConfig,
    backup_retries: u32,
}

impl ModelFallbackMiddleware {
    /// Create the middleware over an endpoint pair.
    pub fn new(endpoints: ModelEndpointConfig, backup_retries: u32) -> Self {
        Self {
            endpoints,
            backup_retries: backup_retries.max(1),
        }
    }
}

#[async_trait]
impl TurnMiddleware for ModelFallbackMiddleware {
    fn name(&self) -> &str {
        "model_fallback"
    }

    async fn wrap_model_call(
        &self,
        request: TurnRequest,
        next: &dyn ModelCaller,
    ) -> Result<ChatResponse, GatewayError> {
        let mut attempt = request.clone();
        attempt.endpoint_override = Some(self.endpoints.primary.clone());
        let primary_error = match next.call(attempt).await {
            Ok(response) => return Ok(response),
            Err(error) if error.is_retryable() => error,
            Err(error) => return Err(error),
        };

        let mut last_error = primary_error;
        for _ in 0..self.backup_retries {
            let mut attempt = request.clone();
            attempt.endpoint_override = Some(self.endpoints.backup.clone());
            match next.call(attempt).await {
                Ok(response) => return Ok(response),
                Err(error) if error.is_retryable() => last_error = error,
                Err(error) => return Err(error),
            }
        }
        Err(GatewayError::ModelUnavailable(last_error.to_string()))
    }
}
