//! Important-notes middleware and its note-writing tool.

use super::{ModelCaller, TurnMiddleware};
use crate::context::{ContextStore, ImportantNote, NotesLog, TurnOrigin};
use crate::gateway::{ChatResponse, GatewayError, TurnRequest};
use crate::tools::{Tool, ToolError, ToolSchema};
use async_trait::async_trait;
use std::sync::Arc;

/// Name of the note-writing tool.
pub const NOTES_TOOL_NAME: &str = "write_important_notes";

const NOTES_SYSTEM_PROMPT: &str = "## `write_important_notes`

You have access to a tool for managing important notes during your work:

`write_important_notes`: use this tool frequently to record new important information.

Record notes more often than you might initially think - it is better to have
too many notes than too few. Record a note when:
- you discover site structure, interfaces or functionality
- you complete any meaningful step in your task
- you find a vulnerability, evidence or a working payload
- you make a decision about your approach or hit an obstacle
- you want to keep track of important data or observations

Notes survive context truncation, so anything not recorded here may be lost
when old tool output is cleared.

Note categories and required fields:
- general, finding, evidence, poc, recommendation: no additional fields
- vulnerability: requires vulnerability_type
- exploration: requires url
- website_structure: requires url and structure_details
- exploit_attempt: requires url, vulnerability_type and attempt_result";

/// Tool recording a structured note into the durable log.
pub struct WriteImportantNotesTool {
    notes: NotesLog,
}

impl WriteImportantNotesTool {
    pub fn new(notes: NotesLog) -> Self {
        Self { notes }
    }
}

#[async_trait]
impl Tool for WriteImportantNotesTool {
    fn name(&self) -> &str {
        NOTES_TOOL_NAME
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: NOTES_TOOL_NAME.to_string(),
            description: "Record an important note during the work session. Notes are durable \
                          and survive context truncation. Categorize with 'category'; attach \
                          raw request/response samples via 'http_requests'."
                .to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "content": {"type": "string", "description": "The note content"},
                    "category": {
                        "type": "string",
                        "enum": [
                            "general", "vulnerability", "finding", "evidence", "poc",
                            "recommendation", "exploration", "website_structure",
                            "exploit_attempt"
                        ]
                    },
                    "url": {"type": "string"},
                    "structure_details": {"type": "string"},
                    "vulnerability_type": {"type": "string"},
                    "attempt_result": {"type": "string", "enum": ["success", "failure"]},
                    "can_be_further_exploited": {"type": "boolean"},
                    "http_requests": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["content"]
            }),
        }
    }

    async fn invoke(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let note: ImportantNote = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        note.validate().map_err(ToolError::InvalidArguments)?;
        self.notes.append(note);
        Ok(format!(
            "Recorded. Current important notes:\n{}",
            self.notes.render_yaml()
        ))
    }
}

/// Adds note-taking capability to an agent.
///
/// Extends the system prompt with usage guidance, contributes the
/// [`WriteImportantNotesTool`], and marks note-recording turns so context
/// editing never evicts them.
pub struct ImportantNotesMiddleware {
    notes: NotesLog,
}

impl ImportantNotesMiddleware {
    /// Create the middleware over a shared notes log.
    pub fn new(notes: NotesLog) -> Self {
        Self { notes }
    }

    /// Handle to the underlying log.
    pub fn notes(&self) -> &NotesLog {
        &self.notes
    }
}

#[async_trait]
impl TurnMiddleware for ImportantNotesMiddleware {
    fn name(&self) -> &str {
        "important_notes"
    }

    async fn wrap_model_call(
        &self,
        mut request: TurnRequest,
        next: &dyn ModelCaller,
    ) -> Result<ChatResponse, GatewayError> {
        request.system_prompt = format!("{}\n\n{}", request.system_prompt, NOTES_SYSTEM_PROMPT);
        next.call(request).await
    }

    fn after_tool_execution(&self, store: &mut ContextStore) -> anyhow::Result<()> {
        for turn in store.turns_mut() {
            if turn.origin == TurnOrigin::Model && turn.invoked_tool(NOTES_TOOL_NAME) {
                turn.origin = TurnOrigin::Note;
            }
        }
        Ok(())
    }

    fn provided_tools(&self) -> Vec<Arc<dyn Tool>> {
        vec![Arc::new(WriteImportantNotesTool::new(self.notes.clone()))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ToolCallRecord, ToolOutcome, Turn};

    #[tokio::test]
    async fn test_note_tool_validates_category_fields() {
        let log = NotesLog::new();
        let tool = WriteImportantNotesTool::new(log.clone());

        let err = tool
            .invoke(serde_json::json!({
                "content": "sqli in login",
                "category": "vulnerability"
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
        assert!(log.is_empty());

        let ok = tool
            .invoke(serde_json::json!({
                "content": "sqli in login",
                "category": "vulnerability",
                "vulnerability_type": "sqli"
            }))
            .await
            .unwrap();
        assert!(ok.contains("sqli in login"));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_note_turns_are_marked_after_tool_execution() {
        let middleware = ImportantNotesMiddleware::new(NotesLog::new());
        let mut store = ContextStore::new();

        let mut with_note = Turn::assistant("recording");
        with_note.tool_calls.push(ToolCallRecord {
            sequence: store.allocate_sequence(),
            call_id: "call_0".to_string(),
            tool_name: NOTES_TOOL_NAME.to_string(),
            arguments: serde_json::json!({"content": "x"}),
            outcome: ToolOutcome::Success("recorded".to_string()),
        });
        store.push(with_note);

        let mut without_note = Turn::assistant("probing");
        without_note.tool_calls.push(ToolCallRecord {
            sequence: store.allocate_sequence(),
            call_id: "call_1".to_string(),
            tool_name: "curl".to_string(),
            arguments: serde_json::json!({}),
            outcome: ToolOutcome::Success("200".to_string()),
        });
        store.push(without_note);

        middleware.after_tool_execution(&mut store).unwrap();
        assert_eq!(store.turns()[0].origin, TurnOrigin::Note);
        assert_eq!(store.turns()[1].origin, TurnOrigin::Model);
    }

    #[tokio::test]
    async fn test_system_prompt_is_extended() {
        struct Capture;

        #[async_trait]
        impl ModelCaller for Capture {
            async fn call(&self, request: TurnRequest) -> Result<ChatResponse, GatewayError> {
                Ok(ChatResponse::content(request.system_prompt))
            }
        }

        let middleware = ImportantNotesMiddleware::new(NotesLog::new());
        let request = TurnRequest {
            system_prompt: "base prompt".to_string(),
            turns: Vec::new(),
            temperature: None,
            tools: Vec::new(),
            endpoint_override: None,
        };
        let response = middleware.wrap_model_call(request, &Capture).await.unwrap();
        let prompt = response.content.unwrap();
        assert!(prompt.starts_with("base prompt"));
        assert!(prompt.contains("write_important_notes"));
    }
}
