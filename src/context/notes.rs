//! Durable important-notes side-channel.
//!
//! Notes are recorded by the `write_important_notes` tool and kept outside
//! the rolling conversation window, so context editing can truncate old tool
//! results without losing key findings. The log is shared across concurrent
//! runs and is append-only: writers take a short in-memory lock, never held
//! across an await point.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Outcome of an exploitation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptResult {
    Success,
    Failure,
}

/// Note category, determining which fields are required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteCategory {
    /// General observations; no additional fields required.
    #[default]
    General,
    /// A discovered security vulnerability; requires `vulnerability_type`.
    Vulnerability,
    /// A key finding during assessment.
    Finding,
    /// Evidence supporting a finding.
    Evidence,
    /// Proof-of-concept information.
    Poc,
    /// Recommendation based on findings.
    Recommendation,
    /// Functionality exploration; requires `url`.
    Exploration,
    /// Site structure or interface information; requires `url` and
    /// `structure_details`.
    WebsiteStructure,
    /// Exploitation attempt; requires `url`, `vulnerability_type` and
    /// `attempt_result`.
    ExploitAttempt,
}

/// A single recorded note.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportantNote {
    #[serde(default)]
    pub category: NoteCategory,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub structure_details: Option<String>,
    #[serde(default)]
    pub vulnerability_type: Option<String>,
    #[serde(default)]
    pub attempt_result: Option<AttemptResult>,
    #[serde(default)]
    pub can_be_further_exploited: bool,
    /// Associated raw HTTP request/response samples.
    #[serde(default)]
    pub http_requests: Vec<String>,
}

impl ImportantNote {
    /// Check category-specific required fields.
    pub fn validate(&self) -> Result<(), String> {
        let require = |field: &Option<String>, name: &str| -> Result<(), String> {
            match field.as_deref() {
                Some(value) if !value.is_empty() => Ok(()),
                _ => Err(format!(
                    "'{}' is required for {} notes",
                    name,
                    category_label(self.category)
                )),
            }
        };

        match self.category {
            NoteCategory::Vulnerability => require(&self.vulnerability_type, "vulnerability_type"),
            NoteCategory::Exploration => require(&self.url, "url"),
            NoteCategory::WebsiteStructure => {
                require(&self.url, "url")?;
                require(&self.structure_details, "structure_details")
            }
            NoteCategory::ExploitAttempt => {
                require(&self.url, "url")?;
                require(&self.vulnerability_type, "vulnerability_type")?;
                if self.attempt_result.is_none() {
                    return Err(
                        "'attempt_result' is required for exploit_attempt notes".to_string()
                    );
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn category_label(category: NoteCategory) -> &'static str {
    match category {
        NoteCategory::General => "general",
        NoteCategory::Vulnerability => "vulnerability",
        NoteCategory::Finding => "finding",
        NoteCategory::Evidence => "evidence",
        NoteCategory::Poc => "poc",
        NoteCategory::Recommendation => "recommendation",
        NoteCategory::Exploration => "exploration",
        NoteCategory::WebsiteStructure => "website_structure",
        NoteCategory::ExploitAttempt => "exploit_attempt",
    }
}

/// Shared, append-only log of important notes.
#[derive(Debug, Clone, Default)]
pub struct NotesLog {
    notes: Arc<Mutex<Vec<ImportantNote>>>,
}

impl NotesLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a note.
    pub fn append(&self, note: ImportantNote) {
        let mut notes = self.notes.lock().unwrap_or_else(|e| e.into_inner());
        notes.push(note);
    }

    /// Number of recorded notes.
    pub fn len(&self) -> usize {
        self.notes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of all notes recorded so far.
    pub fn snapshot(&self) -> Vec<ImportantNote> {
        self.notes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// One-line-per-note summary for prompt injection.
    pub fn render_summary(&self) -> String {
        let notes = self.snapshot();
        if notes.is_empty() {
            return "(no notes recorded yet)".to_string();
        }
        notes
            .iter()
            .map(|note| format!("- [{}] {}", category_label(note.category), note.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Full YAML rendering of the current note list.
    pub fn render_yaml(&self) -> String {
        serde_yaml::to_string(&self.snapshot()).unwrap_or_else(|e| format!("(render error: {})", e))
    }
}
