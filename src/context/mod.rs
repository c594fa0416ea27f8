//! Conversation context for agent runs.
//!
//! A [`ContextStore`] is the ordered, mutable record of one run's turns and
//! tool calls. Each store is exclusively owned by a single agent execution
//! context: there is exactly one writer, and turns are appended in the order
//! the owning run produced them. The durable notes side-channel lives in
//! [`notes`] and survives context editing.

pub mod notes;

pub use notes::{AttemptResult, ImportantNote, NoteCategory, NotesLog};

use serde::{Deserialize, Serialize};

/// Message role within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-authored turn (terminal records).
    System,
    /// Operator input or synthetic runtime injections.
    User,
    /// Model output, optionally carrying tool call records.
    Assistant,
}

/// Provenance of a turn, used by context-editing policies to decide what may
/// be evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOrigin {
    /// The initial task input or a follow-up user message.
    User,
    /// A model response, including any tool calls it triggered.
    Model,
    /// A model turn that recorded important notes; never evicted.
    Note,
    /// A synthetic reminder injected by the wake-up edit policy.
    Reminder,
    /// The single terminal record appended when a run reaches a final state.
    Terminal,
}

/// Result of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ToolOutcome {
    /// Tool produced output.
    Success(String),
    /// Tool reported an error; recorded, not run-fatal by itself.
    Error(String),
}

impl ToolOutcome {
    /// Text fed back to the model on the next turn.
    pub fn as_text(&self) -> &str {
        match self {
            ToolOutcome::Success(text) => text,
            ToolOutcome::Error(text) => text,
        }
    }

    /// Whether the invocation succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Success(_))
    }
}

/// One executed tool call with its result.
///
/// Sequence indices are allocated by the owning [`ContextStore`] and are
/// strictly increasing with no gaps in allocation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Store-scoped sequence index.
    pub sequence: u64,
    /// Call identifier assigned by the model endpoint.
    pub call_id: String,
    /// Name of the invoked tool.
    pub tool_name: String,
    /// Arguments as supplied by the model.
    pub arguments: serde_json::Value,
    /// Result payload or error text.
    pub outcome: ToolOutcome,
}

/// One exchange unit in a run: a message plus any tool calls it triggered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Tool call records produced by this turn, in execution order.
    pub tool_calls: Vec<ToolCallRecord>,
    pub origin: TurnOrigin,
}

impl Turn {
    /// User turn carrying task input.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            origin: TurnOrigin::User,
        }
    }

    /// Assistant turn; tool call records are attached after execution.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            origin: TurnOrigin::Model,
        }
    }

    /// Synthetic reminder injected by a context edit.
    pub fn reminder(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            origin: TurnOrigin::Reminder,
        }
    }

    /// Terminal record appended exactly once per run.
    pub fn terminal(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            origin: TurnOrigin::Terminal,
        }
    }

    /// Whether any record in this turn invoked the named tool.
    pub fn invoked_tool(&self, tool_name: &str) -> bool {
        self.tool_calls.iter().any(|record| record.tool_name == tool_name)
    }
}

/// Ordered, single-writer record of a run's conversation history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextStore {
    turns: Vec<Turn>,
    next_sequence: u64,
}

impl ContextStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn.
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Allocate the next tool-call sequence index.
    ///
    /// Indices are strictly increasing with no gaps in allocation order;
    /// context editing may later remove old records, but never renumbers.
    pub fn allocate_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    /// All turns in production order.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Mutable access for context-editing policies.
    ///
    /// Editing may remove or mark turns; it must never reorder them.
    pub fn turns_mut(&mut self) -> &mut Vec<Turn> {
        &mut self.turns
    }

    /// Number of turns currently held.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether the store holds no turns.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Most recently appended turn.
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// First user turn, i.e. the initial task input.
    pub fn initial_input(&self) -> Option<&str> {
        self.turns
            .iter()
            .find(|turn| turn.role == Role::User && turn.origin == TurnOrigin::User)
            .map(|turn| turn.content.as_str())
    }

    /// Iterate all tool call records in production order.
    pub fn tool_call_records(&self) -> impl Iterator<Item = &ToolCallRecord> {
        self.turns.iter().flat_map(|turn| turn.tool_calls.iter())
    }

    /// Rough token estimate over turn contents and tool arguments.
    ///
    /// Four characters per token, matching the approximation used by the
    /// context-editing trigger threshold.
    pub fn estimated_tokens(&self) -> usize {
        let chars: usize = self
            .turns
            .iter()
            .map(|turn| {
                turn.content.len()
                    + turn
                        .tool_calls
                        .iter()
                        .map(|record| {
                            record.arguments.to_string().len() + record.outcome.as_text().len()
                        })
                        .sum::<usize>()
            })
            .sum();
        chars / 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_indices_strictly_increasing_no_gaps() {
        let mut store = ContextStore::new();
        let mut turn = Turn::assistant("running tools");
        for i in 0..5u64 {
            let sequence = store.allocate_sequence();
            assert_eq!(sequence, i);
            turn.tool_calls.push(ToolCallRecord {
                sequence,
                call_id: format!("call_{}", i),
                tool_name: "curl".to_string(),
                arguments: serde_json::json!({}),
                outcome: ToolOutcome::Success("ok".to_string()),
            });
        }
        store.push(turn);

        let sequences: Vec<u64> = store.tool_call_records().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_initial_input_skips_reminders() {
        let mut store = ContextStore::new();
        store.push(Turn::reminder("calibration"));
        store.push(Turn::user("find the flag"));
        assert_eq!(store.initial_input(), Some("find the flag"));
    }

    #[test]
    fn test_estimated_tokens_scales_with_content() {
        let mut store = ContextStore::new();
        assert_eq!(store.estimated_tokens(), 0);
        store.push(Turn::user("x".repeat(400)));
        assert_eq!(store.estimated_tokens(), 100);
    }

    #[test]
    fn test_invoked_tool_matches_record_name() {
        let mut turn = Turn::assistant("");
        turn.tool_calls.push(ToolCallRecord {
            sequence: 0,
            call_id: "call_0".to_string(),
            tool_name: "write_important_notes".to_string(),
            arguments: serde_json::json!({}),
            outcome: ToolOutcome::Success("recorded".to_string()),
        });
        assert!(turn.invoked_tool("write_important_notes"));
        assert!(!turn.invoked_tool("curl"));
    }
}
