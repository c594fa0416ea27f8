//! Context-editing policies applied after each tool-execution step.
//!
//! Two built-in policies keep long runs on track: [`LongChainWakeUp`] breaks
//! up uninterrupted tool-use chains with a calibration reminder, and
//! [`ClearToolUsesEdit`] evicts old tool results once the window grows past a
//! token threshold. Policies run in declaration order and mutate the store in
//! place; they remove or inject turns but never reorder them.

use super::TurnMiddleware;
use crate::context::{ContextStore, NotesLog, Turn, TurnOrigin};
use crate::tools::find_flags;
use anyhow::Result;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// One ordered edit policy inside [`ContextEditingMiddleware`].
pub trait ContextEdit: Send + Sync {
    /// Policy name for logging.
    fn name(&self) -> &str;

    /// Apply the edit to the store. Runs after tool execution each turn.
    fn apply(&self, store: &mut ContextStore, notes: &NotesLog) -> Result<()>;
}

/// Container middleware running its edit policies in declaration order.
pub struct ContextEditingMiddleware {
    edits: Vec<Arc<dyn ContextEdit>>,
    notes: NotesLog,
}

impl ContextEditingMiddleware {
    pub fn new(edits: Vec<Arc<dyn ContextEdit>>, notes: NotesLog) -> Self {
        Self { edits, notes }
    }
}

impl TurnMiddleware for ContextEditingMiddleware {
    fn name(&self) -> &str {
        "context_editing"
    }

    fn after_tool_execution(&self, store: &mut ContextStore) -> Result<()> {
        for edit in &self.edits {
            edit.apply(store, &self.notes)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct WakeUpState {
    consecutive: u32,
    /// Highest tool-call sequence already counted.
    last_seen: Option<u64>,
}

/// Injects a calibration reminder after long uninterrupted tool chains.
///
/// Counts consecutive turns that invoked any tool outside `exclude_tools`;
/// a call to `important_tool_name` resets the count. At
/// `max_consecutive_counts` the policy removes any stale reminder, injects a
/// fresh one aggregating the initial task, recorded notes and any flag-like
/// strings seen so far, and resets the counter. The counter is owned by this
/// instance, so pipelines built per execution context keep it store-scoped.
pub struct LongChainWakeUp {
    max_consecutive_counts: u32,
    important_tool_name: String,
    exclude_tools: HashSet<String>,
    state: Mutex<WakeUpState>,
}

impl LongChainWakeUp {
    pub fn new(
        max_consecutive_counts: u32,
        important_tool_name: impl Into<String>,
        exclude_tools: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            max_consecutive_counts: max_consecutive_counts.max(1),
            important_tool_name: important_tool_name.into(),
            exclude_tools: exclude_tools.into_iter().collect(),
            state: Mutex::new(WakeUpState::default()),
        }
    }

    fn render_reminder(&self, store: &ContextStore, notes: &NotesLog) -> String {
        let task = store.initial_input().unwrap_or("(no task recorded)");

        let mut flags: Vec<String> = Vec::new();
        for record in store.tool_call_records() {
            for flag in find_flags(record.outcome.as_text()) {
                if !flags.contains(&flag) {
                    flags.push(flag);
                }
            }
        }
        let flags_section = if flags.is_empty() {
            String::new()
        } else {
            format!(
                "\n\nFlag-like strings seen so far - verify before submitting:\n{}",
                flags.join("\n")
            )
        };

        format!(
            "<system-reminder>\nYou have been using tools for many consecutive turns \
             without recording your progress. Pause and call `{}` now to capture what \
             you have learned, then continue.\n\nYour original task:\n{}\n\nNotes \
             recorded so far:\n{}{}\n</system-reminder>",
            self.important_tool_name,
            task,
            notes.render_summary(),
            flags_section
        )
    }
}

impl ContextEdit for LongChainWakeUp {
    fn name(&self) -> &str {
        "long_chain_wake_up"
    }

    fn apply(&self, store: &mut ContextStore, notes: &NotesLog) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        for turn in store.turns() {
            let Some(max_sequence) = turn.tool_calls.iter().map(|r| r.sequence).max() else {
                continue;
            };
            if state.last_seen.is_some_and(|seen| max_sequence <= seen) {
                continue;
            }
            state.last_seen = Some(max_sequence);

            if turn.invoked_tool(&self.important_tool_name) {
                state.consecutive = 0;
            } else if turn
                .tool_calls
                .iter()
                .any(|r| !self.exclude_tools.contains(&r.tool_name))
            {
                state.consecutive += 1;
            }
        }

        if state.consecutive >= self.max_consecutive_counts {
            state.consecutive = 0;
            let reminder = self.render_reminder(store, notes);
            // A stale calibration message would contradict the fresh one.
            store
                .turns_mut()
                .retain(|turn| turn.origin != TurnOrigin::Reminder);
            store.push(Turn::reminder(reminder));
        }
        Ok(())
    }
}

/// Evicts old tool-bearing turns once the estimated window exceeds a
/// threshold.
///
/// Eviction is strictly oldest-first and never touches the newest turn, user
/// input, reminders or note-authored turns; the most recent `keep`
/// tool-bearing turns also stay. Turns whose every call targets an excluded
/// tool are left alone.
pub struct ClearToolUsesEdit {
    trigger_tokens: usize,
    keep: usize,
    exclude_tools: HashSet<String>,
}

impl ClearToolUsesEdit {
    pub fn new(
        trigger_tokens: usize,
        keep: usize,
        exclude_tools: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            trigger_tokens,
            keep,
            exclude_tools: exclude_tools.into_iter().collect(),
        }
    }
}

impl ClearToolUsesEdit {
    fn evictable_indices(&self, store: &ContextStore) -> Vec<usize> {
        let newest = store.len().saturating_sub(1);
        store
            .turns()
            .iter()
            .enumerate()
            .filter(|(index, turn)| {
                *index != newest
                    && turn.origin == TurnOrigin::Model
                    && !turn.tool_calls.is_empty()
                    && !turn
                        .tool_calls
                        .iter()
                        .all(|r| self.exclude_tools.contains(&r.tool_name))
            })
            .map(|(index, _)| index)
            .collect()
    }
}

impl ContextEdit for ClearToolUsesEdit {
    fn name(&self) -> &str {
        "clear_tool_uses"
    }

    fn apply(&self, store: &mut ContextStore, _notes: &NotesLog) -> Result<()> {
        if store.estimated_tokens() <= self.trigger_tokens {
            return Ok(());
        }

        let candidates = self.evictable_indices(store);
        let evictable = candidates.len().saturating_sub(self.keep);

        let mut removed = 0;
        for index in candidates.into_iter().take(evictable) {
            if store.estimated_tokens() <= self.trigger_tokens {
                break;
            }
            store.turns_mut().remove(index - removed);
            removed += 1;
        }
        Ok(())
    }
}
