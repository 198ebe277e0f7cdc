//! Data model for the import service

mod analysis;
mod question;
mod row;
mod schema;
mod session;

pub use analysis::{
    ColumnMapping, ConfidenceReport, FileAnalysis, RiskLevel, SectionSummary, TraceEntry,
    TraceKind,
};
pub use question::{ClarificationQuestion, QuestionImportance, QuestionOption, OTHER_SENTINEL};
pub use row::{AggregatedRow, ImportOutcome, RejectedRow, SourceRow, WriteOutcome};
pub use schema::{FieldType, RequestedColumn, SchemaColumn, UnmappedDecision};
pub use session::{
    ImportSession, ImportStage, StageTransition, MAX_CLARIFICATION_ROUNDS, SESSION_TTL_HOURS,
};
