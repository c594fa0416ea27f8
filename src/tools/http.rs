//! HTTP sampling tool.

use super::{render_tool_output, Tool, ToolError, ToolSchema};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECONDS: u64 = 180;

#[derive(Debug, Deserialize)]
struct CurlArgs {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Verbose HTTP request tool in the spirit of `curl -v`.
///
/// Returns a full request/response transcript so successful payloads can be
/// sampled with complete headers, which is what the assessment prompts ask
/// agents to capture as evidence.
#[derive(Debug, Clone)]
pub struct CurlTool {
    client: reqwest::Client,
}

impl CurlTool {
    /// Create the tool with a long request timeout suited to slow targets.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS))
            .danger_accept_invalid_certs(true)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

impl Default for CurlTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CurlTool {
    fn name(&self) -> &str {
        "curl"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "curl".to_string(),
            description: "Send an HTTP request and return a verbose transcript of the full \
                          request and response, including headers. Use this to sample complete \
                          request/response evidence for any payload that worked."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "Target URL"},
                    "method": {"type": "string", "description": "HTTP method, default GET"},
                    "headers": {
                        "type": "object",
                        "description": "Request headers",
                        "additionalProperties": {"type": "string"}
                    },
                    "body": {"type": "string", "description": "Request body"}
                },
                "required": ["url"]
            }),
        }
    }

    async fn invoke(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let args: CurlArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let method = reqwest::Method::from_bytes(args.method.to_uppercase().as_bytes())
            .map_err(|_| ToolError::InvalidArguments(format!("invalid method: {}", args.method)))?;

        let mut transcript = format!("> {} {}\n", method, args.url);
        let mut request = self.client.request(method, &args.url);
        for (name, value) in &args.headers {
            transcript.push_str(&format!("> {}: {}\n", name, value));
            request = request.header(name, value);
        }
        if let Some(body) = &args.body {
            transcript.push_str(&format!(">\n{}\n", body));
            request = request.body(body.clone());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ToolError::Execution(format!("request failed: {}", e)))?;

        transcript.push_str(&format!("\n< {:?} {}\n", response.version(), response.status()));
        for (name, value) in response.headers() {
            transcript.push_str(&format!("< {}: {}\n", name, value.to_str().unwrap_or("?")));
        }
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::Execution(format!("failed to read body: {}", e)))?;
        transcript.push_str("<\n");
        transcript.push_str(&body);

        Ok(render_tool_output(transcript))
    }
}
