//! Clarification questions for human-in-the-loop rounds

use serde::{Deserialize, Serialize};

/// Reserved option value signalling a custom free-text answer.
///
/// This literal must never be persisted as an answer; the caller-corrected
/// text is what gets merged. The merger enforces this defensively.
pub const OTHER_SENTINEL: &str = "__other__";

/// Whether a question blocks auto-advance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionImportance {
    /// Must be answered before the session can proceed
    Critical,
    /// Improves the resolution when answered but never blocks auto-advance
    Optional,
}

/// One selectable option of a clarification question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub value: String,
    pub label: String,
}

/// One pending clarification item for the current round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationQuestion {
    /// Stable question identifier, used as the answers map key
    pub id: String,
    pub text: String,
    pub options: Vec<QuestionOption>,
    pub importance: QuestionImportance,
    /// Used only by the explicit "skip with defaults" path, never silently
    pub default_value: Option<String>,
}
