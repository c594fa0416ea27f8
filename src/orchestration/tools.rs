//! Orchestration-owned tools: the finish signal and delegation surface.

use crate::tools::{Tool, ToolError, ToolSchema};
use async_trait::async_trait;

/// Name of the finish tool terminating a run.
pub const SUBMIT_TOOL_NAME: &str = "submit";

/// Name of the delegation tool routing work to a subagent.
pub const DELEGATE_TOOL_NAME: &str = "task";

/// Finish tool advertised to every agent.
///
/// The execution context intercepts calls to this name before dispatch, so
/// `invoke` only runs if something bypasses the loop; it simply acknowledges.
pub struct SubmitTool;

#[async_trait]
impl Tool for SubmitTool {
    fn name(&self) -> &str {
        SUBMIT_TOOL_NAME
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: SUBMIT_TOOL_NAME.to_string(),
            description: "Submit the final result and finish the run. Call this exactly once, \
                          when the task is complete."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "flag": {
                        "type": "string",
                        "description": "The flag value found during the assessment"
                    },
                    "write_up_content": {
                        "type": "string",
                        "description": "Step-by-step write-up of how the flag was obtained"
                    },
                    "get_real_flag_request": {
                        "type": "string",
                        "description": "The raw request that produced the flag"
                    },
                    "get_real_flag_response": {
                        "type": "string",
                        "description": "The raw response containing the flag"
                    }
                },
                "required": ["flag"]
            }),
        }
    }

    async fn invoke(&self, _arguments: serde_json::Value) -> Result<String, ToolError> {
        Ok("submission recorded".to_string())
    }
}
