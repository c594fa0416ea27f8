//! OpenAI-compatible chat-completions gateway.

use super::{ChatResponse, GatewayError, ModelEndpoint, ModelGateway, ToolCallRequest, TurnRequest};
use crate::context::{Role, Turn};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

const REQUEST_TIMEOUT_SECONDS: u64 = 180;

/// Gateway speaking the OpenAI chat-completions wire format.
///
/// Works against any endpoint exposing `POST {base_url}/chat/completions`
/// with bearer authentication, which covers the hosted providers and the
/// usual self-hosted proxies.
#[derive(Debug, Clone)]
pub struct OpenAiGateway {
    client: reqwest::Client,
}

impl OpenAiGateway {
    /// Create a gateway with the default request timeout.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    fn build_messages(request: &TurnRequest) -> Vec<Value> {
        let mut messages = Vec::with_capacity(request.turns.len() + 1);
        messages.push(json!({
            "role": "system",
            "content": request.system_prompt,
        }));

        for turn in &request.turns {
            match turn.role {
                Role::Assistant if !turn.tool_calls.is_empty() => {
                    push_assistant_with_tools(&mut messages, turn);
                }
                Role::Assistant => {
                    messages.push(json!({"role": "assistant", "content": turn.content}));
                }
                // Terminal records never reach the wire in practice; keep the
                // system role rather than dropping the turn.
                Role::System => {
                    messages.push(json!({"role": "system", "content": turn.content}));
                }
                Role::User => {
                    messages.push(json!({"role": "user", "content": turn.content}));
                }
            }
        }
        messages
    }

    fn build_body(endpoint: &ModelEndpoint, request: &TurnRequest) -> Value {
        let mut body = json!({
            "model": endpoint.model,
            "temperature": request.temperature.unwrap_or(endpoint.temperature),
            "messages": Self::build_messages(request),
        });
        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|schema| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": schema.name,
                            "description": schema.description,
                            "parameters": schema.parameters,
                        },
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        body
    }

    fn parse_response(payload: Value) -> Result<ChatResponse, GatewayError> {
        let message = payload
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .ok_or_else(|| {
                GatewayError::MalformedResponse("response has no choices[0].message".to_string())
            })?;

        let content = message
            .get("content")
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut tool_calls = Vec::new();
        if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
            for call in calls {
                let id = call
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let function = call.get("function").ok_or_else(|| {
                    GatewayError::MalformedResponse("tool call has no function".to_string())
                })?;
                let name = function
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        GatewayError::MalformedResponse("tool call has no name".to_string())
                    })?
                    .to_string();
                let raw_arguments = function
                    .get("arguments")
                    .and_then(Value::as_str)
                    .unwrap_or("{}");
                let arguments: Value = serde_json::from_str(raw_arguments).map_err(|e| {
                    GatewayError::MalformedResponse(format!(
                        "tool call arguments are not valid JSON: {}",
                        e
                    ))
                })?;
                tool_calls.push(ToolCallRequest {
                    id,
                    name,
                    arguments,
                });
            }
        }

        Ok(ChatResponse {
            content,
            tool_calls,
        })
    }

    fn classify_status(status: reqwest::StatusCode, body: String) -> GatewayError {
        match status.as_u16() {
            401 | 403 => GatewayError::Unauthorized,
            408 => GatewayError::Timeout,
            429 => GatewayError::RateLimited,
            _ => GatewayError::Endpoint(format!("status {}: {}", status, body)),
        }
    }
}

impl Default for OpenAiGateway {
    fn default() -> Self {
        Self::new()
    }
}

fn push_assistant_with_tools(messages: &mut Vec<Value>, turn: &Turn) {
    let calls: Vec<Value> = turn
        .tool_calls
        .iter()
        .map(|record| {
            json!({
                "id": record.call_id,
                "type": "function",
                "function": {
                    "name": record.tool_name,
                    "arguments": record.arguments.to_string(),
                },
            })
        })
        .collect();
    messages.push(json!({
        "role": "assistant",
        "content": turn.content,
        "tool_calls": calls,
    }));
    for record in &turn.tool_calls {
        messages.push(json!({
            "role": "tool",
            "tool_call_id": record.call_id,
            "content": record.outcome.as_text(),
        }));
    }
}

#[async_trait]
impl ModelGateway for OpenAiGateway {
    async fn invoke(
        &self,
        endpoint: &ModelEndpoint,
        request: &TurnRequest,
    ) -> Result<ChatResponse, GatewayError> {
        let url = format!(
            "{}/chat/completions",
            endpoint.base_url.trim_end_matches('/')
        );
        let body = Self::build_body(endpoint, request);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&endpoint.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout
                } else {
                    GatewayError::Endpoint(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;
        Self::parse_response(payload)
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }
}
