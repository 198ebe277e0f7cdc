//! Confidence evaluator
//!
//! Pure branch decision over the session's confidence and mapping state.
//! No I/O: the adaptive threshold is supplied by the caller (pattern memory
//! provides it, with a default when unavailable).

use crate::models::{ImportSession, QuestionImportance};

/// Threshold used when pattern memory supplies none
pub const DEFAULT_ADAPTIVE_THRESHOLD: f64 = 0.75;

/// Outcome of evaluating a session after an analysis round
#[derive(Debug, Clone, PartialEq)]
pub enum BranchDecision {
    /// Confidence clears the threshold and every gate is satisfied
    Proceed,
    /// More clarification needed this round
    Ask,
    /// A mandatory per-column decision is missing; import cannot proceed
    Blocked {
        /// The specific unresolved item, so the user has an actionable next step
        item: String,
        reason: String,
    },
}

/// Decide proceed / ask / blocked for the current round
///
/// `skip_with_defaults` is the explicit path that treats a question with a
/// `default_value` as answered-by-default; it is never applied silently.
pub fn evaluate(
    session: &ImportSession,
    adaptive_threshold: f64,
    skip_with_defaults: bool,
) -> BranchDecision {
    // Unanswered critical questions always force another round, regardless
    // of how high the overall confidence is
    for question in &session.questions {
        let answered = session.answers.contains_key(&question.id)
            || (skip_with_defaults && question.default_value.is_some());

        if !answered && question.importance == QuestionImportance::Critical {
            return BranchDecision::Ask;
        }
    }

    // Every unmapped source column needs an explicit ignore/fallback/new-column
    // decision before import can proceed
    if let Some(column) = session.undecided_columns().into_iter().next() {
        return BranchDecision::Blocked {
            item: column.clone(),
            reason: format!(
                "Column '{}' is not mapped to any field; choose ignore, \
                 store-in-fallback, or request a schema change",
                column
            ),
        };
    }

    // Requested columns awaiting approval block the import gate
    if let Some(pending) = session.pending_column_requests().first() {
        return BranchDecision::Blocked {
            item: pending.name.clone(),
            reason: format!(
                "Requested column '{}' is awaiting an approval decision",
                pending.name
            ),
        };
    }

    let overall = session.confidence.as_ref().map(|c| c.overall).unwrap_or(0.0);

    // Inclusive boundary: overall == threshold meets the threshold.
    // Unanswered optional questions never hold the session back on their
    // own; only the importance level gates auto-advance.
    if overall >= adaptive_threshold {
        BranchDecision::Proceed
    } else {
        BranchDecision::Ask
    }
}
