//! Import services
//!
//! Pure decision logic (confidence evaluation, aggregation, answer merging,
//! schema reconciliation), the external-service clients behind trait seams,
//! and the orchestrator that drives the session state machine.

pub mod aggregator;
pub mod answer_merger;
pub mod confidence_evaluator;
pub mod inventory_client;
pub mod object_store_client;
pub mod orchestrator;
pub mod pattern_memory_client;
pub mod reasoning_client;
pub mod schema_reconciler;

pub use aggregator::{aggregate, should_aggregate, AggregationOutcome};
pub use answer_merger::{merge_answers, AnswerBatch, MergeReport, RejectedAnswer};
pub use confidence_evaluator::{evaluate, BranchDecision, DEFAULT_ADAPTIVE_THRESHOLD};
pub use inventory_client::{EnsureColumnOutcome, HttpInventoryClient, StructuredStore};
pub use object_store_client::{HttpObjectStoreClient, ObjectStore, UploadTarget};
pub use orchestrator::{ImportOrchestrator, OrchestratorConfig};
pub use pattern_memory_client::{
    shape_signature, HttpPatternMemoryClient, PatternMemory, PriorKnowledge, ResolutionCorrection,
};
pub use reasoning_client::{AnalyzeRequest, AnalyzeResponse, HttpReasoningClient, ReasoningService};
