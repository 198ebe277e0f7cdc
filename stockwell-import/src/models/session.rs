//! Import session state machine
//!
//! An import session progresses through the stages:
//! idle → uploading → recalling → analyzing → {questioning ⇄ re-analyzing}
//! → reviewing → processing → importing → learning → complete,
//! with `error` reachable from every non-terminal stage. A session with no
//! pending questions takes the analyzing → reviewing shortcut.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::{
    ClarificationQuestion, ColumnMapping, ConfidenceReport, FileAnalysis, RequestedColumn,
    TraceEntry, UnmappedDecision,
};

/// Session time-to-live; expired sessions are garbage-collected wholesale
pub const SESSION_TTL_HOURS: i64 = 24;

/// Clarification rounds allowed before the session is forced to error
pub const MAX_CLARIFICATION_ROUNDS: u32 = 10;

/// Import workflow stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStage {
    /// Session created, nothing confirmed yet
    Idle,
    /// Waiting for the client PUT to object storage to be confirmed
    Uploading,
    /// Consulting pattern memory for prior knowledge
    Recalling,
    /// First call to the content-understanding service
    Analyzing,
    /// Clarification questions pending human answers
    Questioning,
    /// Re-invoking the content-understanding service with accumulated answers
    Reanalyzing,
    /// Human-reviewable summary presented, awaiting explicit approval
    Reviewing,
    /// Approved; finalizing column configuration and aggregation
    Processing,
    /// Writing rows to the structured store
    Importing,
    /// Persisting resolution patterns (best-effort)
    Learning,
    /// Import finished
    Complete,
    /// Terminal failure
    Error,
}

impl ImportStage {
    /// Whether this stage is terminal (no further transitions)
    pub fn is_terminal(&self) -> bool {
        matches!(self, ImportStage::Complete | ImportStage::Error)
    }

    /// Whether `self → to` is a legal edge of the workflow graph
    pub fn can_transition(&self, to: ImportStage) -> bool {
        use ImportStage::*;

        // Error reachable from every non-terminal stage
        if to == Error {
            return !self.is_terminal();
        }

        matches!(
            (*self, to),
            (Idle, Uploading)
                | (Uploading, Recalling)
                | (Recalling, Analyzing)
                | (Analyzing, Questioning)
                // "No questions needed" shortcut
                | (Analyzing, Reviewing)
                | (Questioning, Reanalyzing)
                | (Reanalyzing, Questioning)
                | (Reanalyzing, Reviewing)
                | (Reviewing, Processing)
                | (Processing, Importing)
                | (Importing, Learning)
                | (Learning, Complete)
        )
    }
}

/// Stage transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTransition {
    pub session_id: Uuid,
    pub old_stage: ImportStage,
    pub new_stage: ImportStage,
    pub transitioned_at: DateTime<Utc>,
}

/// Import session: the unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSession {
    /// Unique session identifier, immutable for the session lifetime
    pub session_id: Uuid,

    /// Original filename as uploaded
    pub filename: String,

    /// Object storage pointer to the uploaded bytes
    pub storage_key: String,

    /// Declared MIME type of the upload
    pub content_type: String,

    /// Current workflow stage
    pub stage: ImportStage,

    /// Clarification round counter, bounded by MAX_CLARIFICATION_ROUNDS
    pub round: u32,

    /// Structural summary from the last analysis round (replaced wholesale)
    pub file_analysis: Option<FileAnalysis>,

    /// Append-only reasoning trace, never truncated
    pub reasoning_trace: Vec<TraceEntry>,

    /// Pending clarification questions for the current round only
    pub questions: Vec<ClarificationQuestion>,

    /// Accumulated answers, question id → value; keys are never dropped
    pub answers: BTreeMap<String, String>,

    /// Accumulated free-text instructions for "other" answers
    pub ai_instructions: BTreeMap<String, String>,

    /// Mappings learned for seeding future sessions with the same shape
    pub learned_mappings: BTreeMap<String, String>,

    /// Append-only new-column requests; entries only flip to approved
    pub requested_new_columns: Vec<RequestedColumn>,

    /// Current best resolution, source column → mapping
    pub column_mappings: BTreeMap<String, ColumnMapping>,

    /// Per-column decisions for source columns with no target field
    pub column_decisions: BTreeMap<String, UnmappedDecision>,

    /// Session-level confidence from the last analysis round
    pub confidence: Option<ConfidenceReport>,

    /// Terminal failure description, null unless stage is Error
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,

    /// Bumped on every mutation; doubles as the optimistic-lock token
    pub updated_at: DateTime<Utc>,

    /// TTL boundary, set at creation and renewed on every successful save
    pub expires_at: DateTime<Utc>,
}

impl ImportSession {
    /// Create a new session in the Idle stage
    pub fn new(filename: String, storage_key: String, content_type: String) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            filename,
            storage_key,
            content_type,
            stage: ImportStage::Idle,
            round: 0,
            file_analysis: None,
            reasoning_trace: Vec::new(),
            questions: Vec::new(),
            answers: BTreeMap::new(),
            ai_instructions: BTreeMap::new(),
            learned_mappings: BTreeMap::new(),
            requested_new_columns: Vec::new(),
            column_mappings: BTreeMap::new(),
            column_decisions: BTreeMap::new(),
            confidence: None,
            error: None,
            created_at: now,
            updated_at: now,
            expires_at: now + Duration::hours(SESSION_TTL_HOURS),
        }
    }

    /// Transition to a new stage, enforcing the workflow graph
    ///
    /// Returns the transition record; rejects edges not in the graph.
    pub fn transition_to(&mut self, new_stage: ImportStage) -> crate::error::Result<StageTransition> {
        if !self.stage.can_transition(new_stage) {
            return Err(crate::error::ImportError::Internal(format!(
                "Illegal stage transition: {:?} -> {:?}",
                self.stage, new_stage
            )));
        }

        let transition = StageTransition {
            session_id: self.session_id,
            old_stage: self.stage,
            new_stage,
            transitioned_at: Utc::now(),
        };
        self.stage = new_stage;
        self.updated_at = transition.transitioned_at;

        Ok(transition)
    }

    /// Force the session into the error state with a human-readable reason
    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        if !self.stage.is_terminal() {
            self.stage = ImportStage::Error;
        }
        self.error = Some(reason);
        self.updated_at = Utc::now();
    }

    /// Whether the session TTL has elapsed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the session is finished (complete or error)
    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Source columns from the last analysis that have neither a mapping
    /// nor an explicit ignore/fallback/new-column decision
    pub fn undecided_columns(&self) -> Vec<String> {
        let Some(analysis) = &self.file_analysis else {
            return Vec::new();
        };
        analysis
            .source_columns
            .iter()
            .filter(|col| {
                !self.column_mappings.contains_key(*col)
                    && !self.column_decisions.contains_key(*col)
            })
            .cloned()
            .collect()
    }

    /// Requested columns still awaiting an approval decision
    pub fn pending_column_requests(&self) -> Vec<&RequestedColumn> {
        self.requested_new_columns
            .iter()
            .filter(|c| !c.approved)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_reachable_from_non_terminal_stages() {
        for stage in [
            ImportStage::Idle,
            ImportStage::Uploading,
            ImportStage::Recalling,
            ImportStage::Analyzing,
            ImportStage::Questioning,
            ImportStage::Reanalyzing,
            ImportStage::Reviewing,
            ImportStage::Processing,
            ImportStage::Importing,
            ImportStage::Learning,
        ] {
            assert!(stage.can_transition(ImportStage::Error), "{:?}", stage);
        }
        assert!(!ImportStage::Complete.can_transition(ImportStage::Error));
        assert!(!ImportStage::Error.can_transition(ImportStage::Error));
    }

    #[test]
    fn no_stage_skipping() {
        assert!(!ImportStage::Analyzing.can_transition(ImportStage::Processing));
        assert!(!ImportStage::Questioning.can_transition(ImportStage::Reviewing));
        assert!(!ImportStage::Reviewing.can_transition(ImportStage::Importing));
    }

    #[test]
    fn shortcut_when_no_questions_needed() {
        assert!(ImportStage::Analyzing.can_transition(ImportStage::Reviewing));
        assert!(ImportStage::Reanalyzing.can_transition(ImportStage::Reviewing));
    }

    #[test]
    fn transition_bumps_updated_at() {
        let mut session = ImportSession::new(
            "inventory.xlsx".to_string(),
            "uploads/abc".to_string(),
            "application/vnd.ms-excel".to_string(),
        );
        let before = session.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));

        let transition = session.transition_to(ImportStage::Uploading).unwrap();
        assert_eq!(transition.old_stage, ImportStage::Idle);
        assert_eq!(session.stage, ImportStage::Uploading);
        assert!(session.updated_at > before);
    }

    #[test]
    fn illegal_transition_rejected() {
        let mut session = ImportSession::new(
            "inventory.csv".to_string(),
            "uploads/def".to_string(),
            "text/csv".to_string(),
        );
        let err = session.transition_to(ImportStage::Importing).unwrap_err();
        assert!(err.to_string().contains("Illegal stage transition"));
        assert_eq!(session.stage, ImportStage::Idle);
    }
}
