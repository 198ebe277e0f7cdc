//! Import orchestrator
//!
//! Drives the session state machine: confirm upload, recall prior knowledge,
//! run analysis rounds against the content-understanding service, loop
//! through clarification rounds, gate on explicit human approval, finalize
//! the schema, aggregate, write rows, and record the outcome in pattern
//! memory. Every mutation is durably saved before a response is returned;
//! each save carries the optimistic-lock token observed at load time so a
//! concurrent writer surfaces as a conflict instead of a lost update.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use stockwell_common::events::{EventBus, ImportEvent};

use crate::db::SessionStore;
use crate::error::{ImportError, Result};
use crate::models::{
    ClarificationQuestion, ColumnMapping, FieldType, ImportOutcome, ImportSession, ImportStage,
    SchemaColumn, SourceRow, TraceEntry, TraceKind, UnmappedDecision, MAX_CLARIFICATION_ROUNDS,
};
use crate::services::aggregator;
use crate::services::answer_merger::{self, AnswerBatch};
use crate::services::confidence_evaluator::{self, BranchDecision, DEFAULT_ADAPTIVE_THRESHOLD};
use crate::services::inventory_client::StructuredStore;
use crate::services::object_store_client::ObjectStore;
use crate::services::pattern_memory_client::{
    shape_signature, PatternMemory, PriorKnowledge, ResolutionCorrection,
};
use crate::services::reasoning_client::{AnalyzeRequest, AnalyzeResponse, ReasoningService};
use crate::services::schema_reconciler;
use crate::utils::retry_transient;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Target table in the structured store
    pub target_table: String,
    /// Target field holding item quantity
    pub quantity_field: String,
    /// Target field holding the business key (e.g. part number)
    pub business_key_field: String,
    /// Target field holding per-unit identifiers (e.g. serial numbers)
    pub sub_identifier_field: String,
    /// Clarification rounds allowed before forcing manual import
    pub max_rounds: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            target_table: "inventory_items".to_string(),
            quantity_field: "quantity".to_string(),
            business_key_field: "part_number".to_string(),
            sub_identifier_field: "serial_number".to_string(),
            max_rounds: MAX_CLARIFICATION_ROUNDS,
        }
    }
}

pub struct ImportOrchestrator {
    store: SessionStore,
    reasoning: Arc<dyn ReasoningService>,
    objects: Arc<dyn ObjectStore>,
    inventory: Arc<dyn StructuredStore>,
    memory: Arc<dyn PatternMemory>,
    event_bus: EventBus,
    config: OrchestratorConfig,
}

impl ImportOrchestrator {
    pub fn new(
        store: SessionStore,
        reasoning: Arc<dyn ReasoningService>,
        objects: Arc<dyn ObjectStore>,
        inventory: Arc<dyn StructuredStore>,
        memory: Arc<dyn PatternMemory>,
        event_bus: EventBus,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            reasoning,
            objects,
            inventory,
            memory,
            event_bus,
            config,
        }
    }

    /// Issue a direct-upload URL for a new file
    pub async fn upload_target(
        &self,
        filename: &str,
        content_type: &str,
    ) -> Result<crate::services::object_store_client::UploadTarget> {
        retry_transient("get_upload_url", || async {
            self.objects.get_upload_url(filename, content_type).await
        })
        .await
    }

    /// Create a new session for an uploaded file
    ///
    /// The upload itself goes direct to object storage; the first round
    /// confirms the bytes landed before any analysis happens.
    pub async fn start(
        &self,
        filename: String,
        storage_key: String,
        content_type: String,
    ) -> Result<ImportSession> {
        let session = ImportSession::new(filename, storage_key, content_type);
        self.store.create(&session).await?;

        self.event_bus.emit(ImportEvent::SessionStarted {
            session_id: session.session_id,
            filename: session.filename.clone(),
            timestamp: Utc::now(),
        });

        tracing::info!(
            session_id = %session.session_id,
            filename = %session.filename,
            "Import session started"
        );

        Ok(session)
    }

    /// Run the first round: confirm upload, recall prior knowledge, analyze
    pub async fn run_first_round(&self, session_id: Uuid) -> Result<ImportSession> {
        let mut session = self.store.load(session_id).await?;

        let token = session.updated_at;
        session.transition_to(ImportStage::Uploading)?;
        self.store.save(&session, token).await?;

        // Confirm the upload landed; the session must not leave `uploading`
        // until the bytes are readable
        let storage_key = session.storage_key.clone();
        let bytes = match retry_transient("confirm_upload", || {
            let key = storage_key.clone();
            async move { self.objects.read(&key).await }
        })
        .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                return self
                    .fail_session(session, format!("Upload could not be confirmed: {}", e))
                    .await;
            }
        };
        if bytes.is_empty() {
            return self
                .fail_session(session, "Uploaded file is empty".to_string())
                .await;
        }

        let token = session.updated_at;
        session.transition_to(ImportStage::Recalling)?;
        self.store.save(&session, token).await?;

        // Only the filename contributes to the shape signature before the
        // first analysis; later rounds key on the full column set
        if let Some(knowledge) = self.recall_prior_knowledge(&session).await {
            session.learned_mappings = knowledge.suggested_mappings;
        }

        let token = session.updated_at;
        session.transition_to(ImportStage::Analyzing)?;
        self.store.save(&session, token).await?;

        tracing::info!(session_id = %session.session_id, "Round 1: analyzing");

        let token = session.updated_at;
        match self.call_reasoning(&session).await {
            Ok(response) => {
                apply_response(&mut session, response);
                self.advance_after_round(session, token).await
            }
            // Round 1 has no known-good question set to fall back to
            Err(e) => {
                self.fail_session(session, format!("Initial analysis failed: {}", e))
                    .await
            }
        }
    }

    /// Current round's clarification questions
    pub async fn get_questions(&self, session_id: Uuid) -> Result<Vec<ClarificationQuestion>> {
        let session = self.store.load(session_id).await?;
        Ok(session.questions)
    }

    /// Load the session as-is
    pub async fn get_session(&self, session_id: Uuid) -> Result<ImportSession> {
        self.store.load(session_id).await
    }

    /// Merge an answer batch and re-analyze with the accumulated context
    ///
    /// A re-analysis failure is a recovery path, not a terminal one: the
    /// last known-good question set is restored for manual resolution and
    /// the session's error field stays null.
    pub async fn submit_answers(
        &self,
        session_id: Uuid,
        batch: AnswerBatch,
        skip_with_defaults: bool,
    ) -> Result<ImportSession> {
        let mut session = self.store.load(session_id).await?;
        let token = session.updated_at;

        if session.stage != ImportStage::Questioning {
            return Err(ImportError::ApprovalRequired(format!(
                "Session is not awaiting answers (stage is {:?})",
                session.stage
            )));
        }

        if session.round >= self.config.max_rounds {
            return self
                .fail_session(
                    session,
                    format!(
                        "Clarification round limit ({}) reached - manual import required",
                        self.config.max_rounds
                    ),
                )
                .await;
        }

        let report = answer_merger::merge_answers(&mut session, batch);
        for rejected in &report.rejected {
            tracing::warn!(
                session_id = %session.session_id,
                question_id = %rejected.question_id,
                reason = %rejected.reason,
                "Answer rejected by merger"
            );
        }

        session.transition_to(ImportStage::Reanalyzing)?;
        self.store.save(&session, token).await?;

        tracing::info!(
            session_id = %session.session_id,
            round = session.round + 1,
            merged = report.merged,
            "Re-analyzing with accumulated context"
        );

        let token = session.updated_at;
        match self.call_reasoning(&session).await {
            Ok(response) => {
                apply_response(&mut session, response);
                let mut session = self.advance_after_round(session, token).await?;

                // Honor the explicit skip-with-defaults path: fill defaults
                // in as real answers so the next evaluation sees them
                if skip_with_defaults && session.stage == ImportStage::Questioning {
                    session = self.apply_defaults(session).await?;
                }

                Ok(session)
            }
            Err(e) => {
                // Recovery fallback: the last known-good questions are still
                // in place (only a successful response replaces them), so
                // return to questioning with no terminal error recorded
                tracing::warn!(
                    session_id = %session.session_id,
                    error = %e,
                    "Re-analysis failed; presenting last known question set"
                );

                session.reasoning_trace.push(TraceEntry {
                    round: session.round,
                    kind: TraceKind::Observation,
                    content: format!(
                        "Re-analysis unavailable ({}); resolve the pending questions manually",
                        e
                    ),
                });
                session.error = None;
                session.transition_to(ImportStage::Questioning)?;
                self.store.save(&session, token).await?;

                Ok(session)
            }
        }
    }

    /// Record the mandatory decision for an unmapped source column
    pub async fn decide_column(
        &self,
        session_id: Uuid,
        source_column: &str,
        decision: UnmappedDecision,
        user_intent: Option<String>,
        inferred_type: Option<FieldType>,
    ) -> Result<ImportSession> {
        let mut session = self.store.load(session_id).await?;
        let token = session.updated_at;

        schema_reconciler::record_decision(
            &mut session,
            source_column,
            decision,
            user_intent,
            inferred_type,
        )?;

        self.store.save(&session, token).await?;
        Ok(session)
    }

    /// Approve requested new columns by name
    pub async fn approve_new_columns(
        &self,
        session_id: Uuid,
        names: &[String],
    ) -> Result<ImportSession> {
        let mut session = self.store.load(session_id).await?;
        let token = session.updated_at;

        let approved = schema_reconciler::approve_columns(&mut session, names)?;
        if approved > 0 {
            self.store.save(&session, token).await?;
        }

        Ok(session)
    }

    /// The reviewing gate: explicit human approval, never auto-advanced
    pub async fn approve(&self, session_id: Uuid) -> Result<ImportSession> {
        let mut session = self.store.load(session_id).await?;
        let token = session.updated_at;

        if session.stage != ImportStage::Reviewing {
            return Err(ImportError::ApprovalRequired(format!(
                "Session is not awaiting review approval (stage is {:?})",
                session.stage
            )));
        }

        let threshold = self.adaptive_threshold(&session).await;
        match confidence_evaluator::evaluate(&session, threshold, false) {
            BranchDecision::Proceed => {}
            BranchDecision::Ask => {
                return Err(ImportError::ApprovalRequired(
                    "Unanswered questions remain; submit answers before approving".to_string(),
                ));
            }
            BranchDecision::Blocked { reason, .. } => {
                return Err(ImportError::ApprovalRequired(reason));
            }
        }

        session.transition_to(ImportStage::Processing)?;
        self.store.save(&session, token).await?;

        tracing::info!(session_id = %session.session_id, "Import approved");
        Ok(session)
    }

    /// Execute the approved import: finalize schema, aggregate, write rows
    pub async fn execute(&self, session_id: Uuid) -> Result<(ImportSession, ImportOutcome)> {
        let mut session = self.store.load(session_id).await?;
        let token = session.updated_at;

        if session.stage != ImportStage::Processing {
            return Err(ImportError::ApprovalRequired(format!(
                "Session is not ready to execute (stage is {:?})",
                session.stage
            )));
        }

        // Materialize approved columns before the importing stage; conflicts
        // fall back to the side-field and are surfaced, never silent
        let fallback_columns = schema_reconciler::materialize_approved(
            &mut session,
            self.inventory.as_ref(),
            &self.config.target_table,
        )
        .await?;

        let live_schema = retry_transient("live_schema", || async {
            self.inventory.live_schema(&self.config.target_table).await
        })
        .await?;

        session.transition_to(ImportStage::Importing)?;
        self.store.save(&session, token).await?;

        // Thread the freshly resolved configuration explicitly through the
        // call chain; never read it back from shared state mid-flight
        let column_mappings = session.column_mappings.clone();

        let storage_key = session.storage_key.clone();
        let rows = match retry_transient("extract_rows", || {
            let key = storage_key.clone();
            let mappings = column_mappings.clone();
            async move { self.reasoning.extract_rows(&key, &mappings).await }
        })
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                self.fail_session(session, format!("Row extraction failed: {}", e))
                    .await?;
                return Err(e);
            }
        };

        let (rows, mappings, warnings) =
            match self.maybe_aggregate(&session, &live_schema, rows, column_mappings) {
                Ok(aggregated) => aggregated,
                Err(e) => {
                    self.fail_session(session, format!("Aggregation failed: {}", e))
                        .await?;
                    return Err(e);
                }
            };

        let write = match retry_transient("write_rows", || {
            let rows = rows.clone();
            let mappings = mappings.clone();
            async move {
                self.inventory
                    .write_rows(&self.config.target_table, &rows, &mappings)
                    .await
            }
        })
        .await
        {
            Ok(write) => write,
            Err(e) => {
                self.fail_session(session, format!("Import write failed: {}", e))
                    .await?;
                return Err(e);
            }
        };

        // Zero successes escalates to session error; partial success does not
        if write.created_count == 0 && !rows.is_empty() {
            let reason = format!(
                "No rows imported; {} rows rejected",
                write.rejected_rows.len()
            );
            let session = self.fail_session(session, reason).await?;
            return Ok((
                session,
                ImportOutcome {
                    created_count: 0,
                    rejected_rows: write.rejected_rows,
                    warnings,
                    fallback_columns,
                },
            ));
        }

        tracing::info!(
            session_id = %session.session_id,
            created = write.created_count,
            rejected = write.rejected_rows.len(),
            "Rows written to inventory store"
        );

        let token = session.updated_at;
        session.transition_to(ImportStage::Learning)?;
        self.store.save(&session, token).await?;

        self.record_learning(&mut session).await;

        let token = session.updated_at;
        session.transition_to(ImportStage::Complete)?;
        self.store.save(&session, token).await?;

        self.event_bus.emit(ImportEvent::SessionCompleted {
            session_id: session.session_id,
            created_count: write.created_count,
            rejected_count: write.rejected_rows.len(),
            timestamp: Utc::now(),
        });

        Ok((
            session,
            ImportOutcome {
                created_count: write.created_count,
                rejected_rows: write.rejected_rows,
                warnings,
                fallback_columns,
            },
        ))
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Evaluate the round's outcome and move to questioning or reviewing
    ///
    /// `token` is the optimistic-lock token from the last durable save.
    async fn advance_after_round(
        &self,
        mut session: ImportSession,
        token: DateTime<Utc>,
    ) -> Result<ImportSession> {
        let threshold = self.adaptive_threshold(&session).await;
        let decision = confidence_evaluator::evaluate(&session, threshold, false);

        match decision {
            BranchDecision::Proceed => {
                session.transition_to(ImportStage::Reviewing)?;
                self.store.save(&session, token).await?;

                self.event_bus.emit(ImportEvent::ReviewReady {
                    session_id: session.session_id,
                    mapped_columns: session.column_mappings.len(),
                    timestamp: Utc::now(),
                });
            }
            BranchDecision::Ask | BranchDecision::Blocked { .. } => {
                session.transition_to(ImportStage::Questioning)?;
                self.store.save(&session, token).await?;
            }
        }

        self.event_bus.emit(ImportEvent::AnalysisRoundCompleted {
            session_id: session.session_id,
            round: session.round,
            questions_pending: session.questions.len(),
            overall_confidence: session
                .confidence
                .as_ref()
                .map(|c| c.overall)
                .unwrap_or(0.0),
            timestamp: Utc::now(),
        });

        Ok(session)
    }

    /// The explicit "skip with defaults" path: answer every defaulted
    /// question with its default and re-evaluate
    async fn apply_defaults(&self, mut session: ImportSession) -> Result<ImportSession> {
        let token = session.updated_at;

        let defaults: Vec<(String, String)> = session
            .questions
            .iter()
            .filter(|q| !session.answers.contains_key(&q.id))
            .filter_map(|q| q.default_value.as_ref().map(|d| (q.id.clone(), d.clone())))
            .collect();

        if defaults.is_empty() {
            return Ok(session);
        }

        for (id, value) in defaults {
            session.answers.insert(id, value);
        }

        let threshold = self.adaptive_threshold(&session).await;
        let proceed = matches!(
            confidence_evaluator::evaluate(&session, threshold, true),
            BranchDecision::Proceed
        );

        if proceed {
            session.transition_to(ImportStage::Reanalyzing)?;
            session.transition_to(ImportStage::Reviewing)?;
        } else {
            session.updated_at = Utc::now();
        }
        self.store.save(&session, token).await?;

        Ok(session)
    }

    async fn call_reasoning(&self, session: &ImportSession) -> Result<AnalyzeResponse> {
        let live_schema = retry_transient("live_schema", || async {
            self.inventory.live_schema(&self.config.target_table).await
        })
        .await?;

        let prior = self.recall_prior_knowledge(session).await;

        let request = AnalyzeRequest {
            storage_key: session.storage_key.clone(),
            filename: session.filename.clone(),
            content_type: session.content_type.clone(),
            file_analysis: session.file_analysis.clone(),
            live_schema,
            prior_knowledge: prior,
            accumulated_answers: session.answers.clone(),
            accumulated_instructions: session.ai_instructions.clone(),
        };

        retry_transient("analyze", || {
            let request = request.clone();
            async move { self.reasoning.analyze(request).await }
        })
        .await
    }

    /// Best-effort pattern-memory lookup; failures degrade to None
    async fn recall_prior_knowledge(&self, session: &ImportSession) -> Option<PriorKnowledge> {
        let columns = session
            .file_analysis
            .as_ref()
            .map(|a| a.source_columns.clone())
            .unwrap_or_default();
        let signature = shape_signature(&session.filename, &columns);

        match self.memory.get_prior_knowledge(&signature).await {
            Ok(knowledge) => knowledge,
            Err(e) => {
                tracing::warn!(
                    session_id = %session.session_id,
                    error = %e,
                    "Pattern memory lookup failed; continuing without prior knowledge"
                );
                None
            }
        }
    }

    /// Adaptive threshold from pattern memory, defaulting when unavailable
    async fn adaptive_threshold(&self, session: &ImportSession) -> f64 {
        self.recall_prior_knowledge(session)
            .await
            .and_then(|k| k.adaptive_threshold)
            .unwrap_or(DEFAULT_ADAPTIVE_THRESHOLD)
    }

    /// Aggregate per-unit rows into unique-key rows when the trigger holds
    fn maybe_aggregate(
        &self,
        session: &ImportSession,
        live_schema: &[SchemaColumn],
        rows: Vec<SourceRow>,
        mappings: BTreeMap<String, ColumnMapping>,
    ) -> Result<(Vec<SourceRow>, BTreeMap<String, ColumnMapping>, Vec<String>)> {
        let source_for = |field: &str| -> Option<String> {
            mappings
                .values()
                .find(|m| m.target_field == field)
                .map(|m| m.source_column.clone())
        };

        let schema_requires_quantity = live_schema
            .iter()
            .any(|c| c.name == self.config.quantity_field);
        let quantity_mapped = source_for(&self.config.quantity_field).is_some();
        let key_column = source_for(&self.config.business_key_field);
        let sub_column = source_for(&self.config.sub_identifier_field);

        let (Some(key_column), Some(sub_column)) = (key_column, sub_column) else {
            return Ok((rows, mappings, Vec::new()));
        };

        if !aggregator::should_aggregate(schema_requires_quantity, quantity_mapped, true) {
            return Ok((rows, mappings, Vec::new()));
        }

        let input_rows = rows.len();
        let outcome = aggregator::aggregate(&rows, &key_column, &sub_column)?;

        tracing::info!(
            session_id = %session.session_id,
            input_rows,
            unique_keys = outcome.rows.len(),
            warnings = outcome.warnings.len(),
            "Aggregated per-unit rows into unique-key rows"
        );

        // Rebuild source rows carrying a synthetic quantity column, and
        // extend the mappings so the store knows where it lands
        let quantity_column = "__aggregated_quantity".to_string();
        let rows: Vec<SourceRow> = outcome
            .rows
            .iter()
            .enumerate()
            .map(|(i, agg)| {
                let mut values = BTreeMap::new();
                values.insert(key_column.clone(), agg.key.clone());
                values.insert(quantity_column.clone(), agg.quantity.to_string());
                values.insert(sub_column.clone(), agg.sub_identifiers.join(","));
                SourceRow {
                    row_ref: i + 1,
                    values,
                }
            })
            .collect();

        let mut mappings = mappings;
        mappings.insert(
            quantity_column.clone(),
            ColumnMapping {
                source_column: quantity_column,
                target_field: self.config.quantity_field.clone(),
                confidence: 1.0,
                sample_values: Vec::new(),
            },
        );

        Ok((rows, mappings, outcome.warnings))
    }

    /// Best-effort learning: never fails the import
    async fn record_learning(&self, session: &mut ImportSession) {
        let final_mappings: BTreeMap<String, String> = session
            .column_mappings
            .iter()
            .map(|(source, m)| (source.clone(), m.target_field.clone()))
            .collect();

        // Corrections are the places where the recalled seed disagreed with
        // the final human-confirmed resolution
        let corrections: Vec<ResolutionCorrection> = session
            .learned_mappings
            .iter()
            .filter_map(|(source, suggested)| {
                final_mappings.get(source).and_then(|resolved| {
                    (suggested != resolved).then(|| ResolutionCorrection {
                        source_column: source.clone(),
                        suggested_field: suggested.clone(),
                        resolved_field: resolved.clone(),
                    })
                })
            })
            .collect();

        let columns = session
            .file_analysis
            .as_ref()
            .map(|a| a.source_columns.clone())
            .unwrap_or_default();
        let signature = shape_signature(&session.filename, &columns);

        if let Err(e) = self
            .memory
            .store_resolution(&signature, &final_mappings, &corrections)
            .await
        {
            tracing::warn!(
                session_id = %session.session_id,
                error = %e,
                "Failed to persist learned patterns (non-fatal)"
            );
        }

        session.learned_mappings = final_mappings;
    }

    /// Terminal failure: record the reason, save, broadcast
    ///
    /// Callers must not have mutated the session since its last durable
    /// save, so `updated_at` still matches the stored row.
    async fn fail_session(
        &self,
        mut session: ImportSession,
        reason: String,
    ) -> Result<ImportSession> {
        tracing::error!(
            session_id = %session.session_id,
            reason = %reason,
            "Import session failed"
        );

        let token = session.updated_at;
        session.fail(reason.clone());
        self.store.save(&session, token).await?;

        self.event_bus.emit(ImportEvent::SessionFailed {
            session_id: session.session_id,
            reason,
            timestamp: Utc::now(),
        });

        Ok(session)
    }
}

/// Fold one analysis response into the session
///
/// The structural summary, questions, and confidence are replaced wholesale;
/// the reasoning trace only ever grows; mappings are merged per source
/// column so an earlier resolution survives unless re-stated.
fn apply_response(session: &mut ImportSession, response: AnalyzeResponse) {
    session.round += 1;
    session.file_analysis = Some(response.file_analysis);

    for entry in response.reasoning_trace_delta {
        session.reasoning_trace.push(TraceEntry {
            round: session.round,
            ..entry
        });
    }

    for mapping in response.column_mappings {
        session
            .column_mappings
            .insert(mapping.source_column.clone(), mapping);
    }

    session.questions = response.questions;
    session.confidence = Some(response.confidence);
    session.updated_at = Utc::now();
}
