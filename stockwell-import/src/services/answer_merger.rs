//! Question/answer merger
//!
//! Reconciles one submitted batch with the session's accumulated answers.
//! Accumulation is monotone: a later round may overwrite the value for its
//! own key, but no other key is ever touched or dropped.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{ImportSession, OTHER_SENTINEL};

/// One batch of answers from a single user interaction
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnswerBatch {
    /// Question id → selected option value (or corrected free text)
    #[serde(default)]
    pub answers: BTreeMap<String, String>,

    /// Question id → custom free-text instruction, present when the user
    /// picked the "other" option
    #[serde(default)]
    pub instructions: BTreeMap<String, String>,
}

/// An answer rejected by the merge, with the reason
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedAnswer {
    pub question_id: String,
    pub reason: String,
}

/// What the merge did
#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    pub merged: usize,
    pub rejected: Vec<RejectedAnswer>,
}

/// Merge a batch into the session's accumulated answers
///
/// The reserved "other" sentinel must never be persisted as an answer: when
/// it arrives with a corrected instruction, the instruction text becomes the
/// answer (and is also recorded in `ai_instructions`); when it arrives bare,
/// the merge is rejected for that key and the prior value stays intact. This
/// is an explicit defensive check against UI event-ordering races, not a
/// silent pass-through.
pub fn merge_answers(session: &mut ImportSession, batch: AnswerBatch) -> MergeReport {
    let mut report = MergeReport::default();

    for (question_id, value) in batch.answers {
        if value == OTHER_SENTINEL {
            match batch.instructions.get(&question_id) {
                Some(text) if !text.trim().is_empty() => {
                    session
                        .answers
                        .insert(question_id.clone(), text.trim().to_string());
                    session
                        .ai_instructions
                        .insert(question_id, text.trim().to_string());
                    report.merged += 1;
                }
                _ => {
                    tracing::warn!(
                        question_id = %question_id,
                        "Rejected reserved sentinel answer with no corrected text"
                    );
                    report.rejected.push(RejectedAnswer {
                        question_id,
                        reason: "Custom answer selected but no text was supplied".to_string(),
                    });
                }
            }
        } else {
            session.answers.insert(question_id, value);
            report.merged += 1;
        }
    }

    // Instructions may also arrive for non-sentinel answers (extra context)
    for (question_id, text) in batch.instructions {
        if !text.trim().is_empty() {
            session
                .ai_instructions
                .entry(question_id)
                .or_insert_with(|| text.trim().to_string());
        }
    }

    if report.merged > 0 {
        session.updated_at = chrono::Utc::now();
    }

    report
}
