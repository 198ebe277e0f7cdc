//! Integration tests for the import orchestrator
//!
//! Exercises the full workflow against scripted in-process implementations
//! of the external services: clarification rounds, the reviewing gate,
//! aggregation, partial write failure, and the recovery fallback.

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use stockwell_common::events::EventBus;
use stockwell_import::db::SessionStore;
use stockwell_import::error::{ImportError, Result};
use stockwell_import::models::{
    ClarificationQuestion, ColumnMapping, ConfidenceReport, FieldType, FileAnalysis,
    ImportSession, ImportStage, QuestionImportance, RejectedRow, RequestedColumn, RiskLevel,
    SchemaColumn, SourceRow, UnmappedDecision, WriteOutcome,
};
use stockwell_import::services::{
    AnalyzeRequest, AnalyzeResponse, EnsureColumnOutcome, ImportOrchestrator, ObjectStore,
    OrchestratorConfig, PatternMemory, PriorKnowledge, ReasoningService, ResolutionCorrection,
    StructuredStore, UploadTarget,
};

// ----------------------------------------------------------------------
// Scripted service doubles
// ----------------------------------------------------------------------

enum AnalyzeScript {
    Respond(AnalyzeResponse),
    ReasoningFailure,
}

struct ScriptedReasoning {
    script: Mutex<VecDeque<AnalyzeScript>>,
    rows: Vec<SourceRow>,
}

impl ScriptedReasoning {
    fn new(script: Vec<AnalyzeScript>, rows: Vec<SourceRow>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            rows,
        }
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoning {
    async fn analyze(&self, _request: AnalyzeRequest) -> Result<AnalyzeResponse> {
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(AnalyzeScript::Respond(response)) => Ok(response),
            Some(AnalyzeScript::ReasoningFailure) => {
                Err(ImportError::Reasoning("unusable response".to_string()))
            }
            None => panic!("analyze called with no scripted response left"),
        }
    }

    async fn extract_rows(
        &self,
        _storage_key: &str,
        _column_mappings: &BTreeMap<String, ColumnMapping>,
    ) -> Result<Vec<SourceRow>> {
        Ok(self.rows.clone())
    }
}

struct FixedObjectStore {
    bytes: Vec<u8>,
}

#[async_trait]
impl ObjectStore for FixedObjectStore {
    async fn get_upload_url(&self, _filename: &str, _content_type: &str) -> Result<UploadTarget> {
        Ok(UploadTarget {
            upload_url: "http://objects.test/put/abc".to_string(),
            storage_key: "uploads/abc".to_string(),
        })
    }

    async fn read(&self, _storage_key: &str) -> Result<Vec<u8>> {
        Ok(self.bytes.clone())
    }
}

struct MockInventory {
    schema: Vec<SchemaColumn>,
    ensure_outcome: EnsureColumnOutcome,
    /// Next write outcome; None means "create everything"
    write_script: Mutex<Option<WriteOutcome>>,
    last_write: Mutex<Option<(Vec<SourceRow>, BTreeMap<String, ColumnMapping>)>>,
}

impl MockInventory {
    fn new(schema: Vec<SchemaColumn>) -> Self {
        Self {
            schema,
            ensure_outcome: EnsureColumnOutcome::Created,
            write_script: Mutex::new(None),
            last_write: Mutex::new(None),
        }
    }
}

#[async_trait]
impl StructuredStore for MockInventory {
    async fn live_schema(&self, _table: &str) -> Result<Vec<SchemaColumn>> {
        Ok(self.schema.clone())
    }

    async fn ensure_column(
        &self,
        _table: &str,
        _name: &str,
        _field_type: FieldType,
    ) -> Result<EnsureColumnOutcome> {
        Ok(self.ensure_outcome)
    }

    async fn write_rows(
        &self,
        _table: &str,
        rows: &[SourceRow],
        column_mappings: &BTreeMap<String, ColumnMapping>,
    ) -> Result<WriteOutcome> {
        *self.last_write.lock().unwrap() = Some((rows.to_vec(), column_mappings.clone()));

        let scripted = self.write_script.lock().unwrap().take();
        Ok(scripted.unwrap_or(WriteOutcome {
            created_count: rows.len(),
            rejected_rows: Vec::new(),
        }))
    }
}

struct MockMemory {
    knowledge: Option<PriorKnowledge>,
    stored: Mutex<Vec<BTreeMap<String, String>>>,
}

impl MockMemory {
    fn empty() -> Self {
        Self {
            knowledge: None,
            stored: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PatternMemory for MockMemory {
    async fn get_prior_knowledge(&self, _shape_signature: &str) -> Result<Option<PriorKnowledge>> {
        Ok(self.knowledge.clone())
    }

    async fn store_resolution(
        &self,
        _shape_signature: &str,
        final_mappings: &BTreeMap<String, String>,
        _corrections: &[ResolutionCorrection],
    ) -> Result<()> {
        self.stored.lock().unwrap().push(final_mappings.clone());
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Harness and fixture builders
// ----------------------------------------------------------------------

struct Harness {
    orchestrator: ImportOrchestrator,
    store: SessionStore,
    inventory: Arc<MockInventory>,
    memory: Arc<MockMemory>,
}

async fn harness(
    reasoning: ScriptedReasoning,
    inventory: MockInventory,
    config: OrchestratorConfig,
) -> Harness {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:")
        .await
        .expect("in-memory database");
    stockwell_import::db::init_tables(&pool)
        .await
        .expect("schema init");

    let store = SessionStore::new(pool);
    let inventory = Arc::new(inventory);
    let memory = Arc::new(MockMemory::empty());

    let orchestrator = ImportOrchestrator::new(
        store.clone(),
        Arc::new(reasoning),
        Arc::new(FixedObjectStore {
            bytes: b"Part,Serial\nP1,S1\n".to_vec(),
        }),
        inventory.clone(),
        memory.clone(),
        EventBus::new(32),
        config,
    );

    Harness {
        orchestrator,
        store,
        inventory,
        memory,
    }
}

fn inventory_schema() -> Vec<SchemaColumn> {
    vec![
        SchemaColumn {
            name: "part_number".to_string(),
            field_type: FieldType::Text,
        },
        SchemaColumn {
            name: "quantity".to_string(),
            field_type: FieldType::Integer,
        },
        SchemaColumn {
            name: "serial_number".to_string(),
            field_type: FieldType::Text,
        },
    ]
}

fn confidence(overall: f64) -> ConfidenceReport {
    ConfidenceReport {
        overall,
        extraction_quality: overall,
        evidence_strength: overall,
        historical_match: 0.0,
        risk_level: RiskLevel::Low,
        factors: Vec::new(),
        requires_hil: false,
    }
}

fn mapping(source: &str, target: &str) -> ColumnMapping {
    ColumnMapping {
        source_column: source.to_string(),
        target_field: target.to_string(),
        confidence: 0.9,
        sample_values: Vec::new(),
    }
}

fn analysis(source_columns: &[&str]) -> FileAnalysis {
    FileAnalysis {
        sections: Vec::new(),
        source_columns: source_columns.iter().map(|c| c.to_string()).collect(),
        row_count: 3,
        detected_type: "spreadsheet".to_string(),
        recommended_strategy: "single_sheet".to_string(),
    }
}

fn response(
    source_columns: &[&str],
    mappings: Vec<ColumnMapping>,
    questions: Vec<ClarificationQuestion>,
    overall: f64,
) -> AnalyzeResponse {
    AnalyzeResponse {
        file_analysis: analysis(source_columns),
        column_mappings: mappings,
        questions,
        confidence: confidence(overall),
        reasoning_trace_delta: Vec::new(),
    }
}

fn critical_question(id: &str) -> ClarificationQuestion {
    ClarificationQuestion {
        id: id.to_string(),
        text: format!("Clarify {}", id),
        options: Vec::new(),
        importance: QuestionImportance::Critical,
        default_value: None,
    }
}

fn row(row_ref: usize, values: &[(&str, &str)]) -> SourceRow {
    SourceRow {
        row_ref,
        values: values
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

fn answers(pairs: &[(&str, &str)]) -> stockwell_import::services::AnswerBatch {
    stockwell_import::services::AnswerBatch {
        answers: pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        instructions: BTreeMap::new(),
    }
}

/// Start a session and run the first analysis round
async fn start_session(h: &Harness) -> ImportSession {
    let session = h
        .orchestrator
        .start(
            "stock.xlsx".to_string(),
            "uploads/abc".to_string(),
            "application/vnd.ms-excel".to_string(),
        )
        .await
        .unwrap();
    h.orchestrator
        .run_first_round(session.session_id)
        .await
        .unwrap()
}

/// Persist a session already sitting at the processing stage
async fn seed_processing_session(
    h: &Harness,
    mappings: &[(&str, &str)],
    requested: Vec<RequestedColumn>,
) -> Uuid {
    let mut session = ImportSession::new(
        "stock.xlsx".to_string(),
        "uploads/abc".to_string(),
        "application/vnd.ms-excel".to_string(),
    );
    session.stage = ImportStage::Processing;
    session.round = 1;
    session.file_analysis = Some(analysis(
        &mappings.iter().map(|(s, _)| *s).collect::<Vec<_>>(),
    ));
    session.confidence = Some(confidence(0.9));
    session.column_mappings = mappings
        .iter()
        .map(|(s, t)| (s.to_string(), mapping(s, t)))
        .collect();
    session.requested_new_columns = requested;

    h.store.create(&session).await.unwrap();
    session.session_id
}

// ----------------------------------------------------------------------
// Workflow tests
// ----------------------------------------------------------------------

#[tokio::test]
async fn first_round_without_questions_shortcuts_to_reviewing() {
    let reasoning = ScriptedReasoning::new(
        vec![AnalyzeScript::Respond(response(
            &["Part", "Qty"],
            vec![mapping("Part", "part_number"), mapping("Qty", "quantity")],
            Vec::new(),
            0.92,
        ))],
        Vec::new(),
    );
    let h = harness(
        reasoning,
        MockInventory::new(inventory_schema()),
        OrchestratorConfig::default(),
    )
    .await;

    let session = start_session(&h).await;

    assert_eq!(session.stage, ImportStage::Reviewing);
    assert_eq!(session.round, 1);
    assert!(session.questions.is_empty());
}

#[tokio::test]
async fn low_confidence_routes_to_questioning() {
    // 0.74 against the default 0.75 threshold: strictly below, so ask
    let reasoning = ScriptedReasoning::new(
        vec![AnalyzeScript::Respond(response(
            &["Part", "Qty"],
            vec![mapping("Part", "part_number"), mapping("Qty", "quantity")],
            vec![critical_question("q_sheet")],
            0.74,
        ))],
        Vec::new(),
    );
    let h = harness(
        reasoning,
        MockInventory::new(inventory_schema()),
        OrchestratorConfig::default(),
    )
    .await;

    let session = start_session(&h).await;

    assert_eq!(session.stage, ImportStage::Questioning);
    assert_eq!(session.questions.len(), 1);
    assert!(session.error.is_none());
}

#[tokio::test]
async fn unmapped_column_blocks_until_decided() {
    let reasoning = ScriptedReasoning::new(
        vec![AnalyzeScript::Respond(response(
            &["Part", "Qty", "Warehouse Zone"],
            vec![mapping("Part", "part_number"), mapping("Qty", "quantity")],
            Vec::new(),
            0.95,
        ))],
        Vec::new(),
    );
    let h = harness(
        reasoning,
        MockInventory::new(inventory_schema()),
        OrchestratorConfig::default(),
    )
    .await;

    let session = start_session(&h).await;

    // High confidence does not bypass the mandatory per-column decision
    assert_eq!(session.stage, ImportStage::Questioning);
    assert_eq!(session.undecided_columns(), vec!["Warehouse Zone"]);

    let session = h
        .orchestrator
        .decide_column(
            session.session_id,
            "Warehouse Zone",
            UnmappedDecision::Ignore,
            None,
            None,
        )
        .await
        .unwrap();

    assert!(session.undecided_columns().is_empty());
}

#[tokio::test]
async fn answers_accumulate_through_reanalysis_to_completion() {
    let reasoning = ScriptedReasoning::new(
        vec![
            AnalyzeScript::Respond(response(
                &["Part", "Qty"],
                vec![mapping("Part", "part_number")],
                vec![critical_question("q_qty")],
                0.60,
            )),
            AnalyzeScript::Respond(response(
                &["Part", "Qty"],
                vec![mapping("Part", "part_number"), mapping("Qty", "quantity")],
                Vec::new(),
                0.91,
            )),
        ],
        vec![
            row(1, &[("Part", "P1"), ("Qty", "4")]),
            row(2, &[("Part", "P2"), ("Qty", "1")]),
        ],
    );
    let h = harness(
        reasoning,
        MockInventory::new(inventory_schema()),
        OrchestratorConfig::default(),
    )
    .await;

    let session = start_session(&h).await;
    assert_eq!(session.stage, ImportStage::Questioning);

    let session = h
        .orchestrator
        .submit_answers(
            session.session_id,
            answers(&[("q_qty", "Qty is the unit count")]),
            false,
        )
        .await
        .unwrap();
    assert_eq!(session.stage, ImportStage::Reviewing);
    assert_eq!(session.round, 2);
    assert_eq!(session.answers["q_qty"], "Qty is the unit count");

    let session = h.orchestrator.approve(session.session_id).await.unwrap();
    assert_eq!(session.stage, ImportStage::Processing);

    let (session, outcome) = h.orchestrator.execute(session.session_id).await.unwrap();
    assert_eq!(session.stage, ImportStage::Complete);
    assert_eq!(outcome.created_count, 2);
    assert!(outcome.rejected_rows.is_empty());

    // The final resolution was recorded for future sessions
    let stored = h.memory.stored.lock().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["Qty"], "quantity");
    assert_eq!(session.learned_mappings["Part"], "part_number");
}

#[tokio::test]
async fn reanalysis_failure_restores_last_known_questions() {
    let reasoning = ScriptedReasoning::new(
        vec![
            AnalyzeScript::Respond(response(
                &["Part", "Qty"],
                vec![mapping("Part", "part_number"), mapping("Qty", "quantity")],
                vec![critical_question("q_sheet")],
                0.70,
            )),
            AnalyzeScript::ReasoningFailure,
        ],
        Vec::new(),
    );
    let h = harness(
        reasoning,
        MockInventory::new(inventory_schema()),
        OrchestratorConfig::default(),
    )
    .await;

    let session = start_session(&h).await;
    let original_questions = session.questions.clone();
    let trace_len = session.reasoning_trace.len();

    let session = h
        .orchestrator
        .submit_answers(session.session_id, answers(&[("q_sheet", "Sheet1")]), false)
        .await
        .unwrap();

    // Recovery, not failure: back to questioning with the prior question
    // set, merged answers retained, and no terminal error recorded
    assert_eq!(session.stage, ImportStage::Questioning);
    assert!(session.error.is_none());
    assert_eq!(session.questions, original_questions);
    assert_eq!(session.answers["q_sheet"], "Sheet1");
    assert_eq!(session.reasoning_trace.len(), trace_len + 1);

    // The durable copy agrees
    let reloaded = h.store.load(session.session_id).await.unwrap();
    assert_eq!(reloaded.stage, ImportStage::Questioning);
    assert!(reloaded.error.is_none());
}

#[tokio::test]
async fn round_limit_forces_manual_import() {
    let reasoning = ScriptedReasoning::new(
        vec![AnalyzeScript::Respond(response(
            &["Part"],
            vec![mapping("Part", "part_number")],
            vec![critical_question("q1")],
            0.50,
        ))],
        Vec::new(),
    );
    let config = OrchestratorConfig {
        max_rounds: 1,
        ..Default::default()
    };
    let h = harness(reasoning, MockInventory::new(inventory_schema()), config).await;

    let session = start_session(&h).await;
    assert_eq!(session.round, 1);

    let session = h
        .orchestrator
        .submit_answers(session.session_id, answers(&[("q1", "a")]), false)
        .await
        .unwrap();

    assert_eq!(session.stage, ImportStage::Error);
    assert!(session.error.as_deref().unwrap().contains("manual import"));
}

#[tokio::test]
async fn approve_rejects_sessions_not_in_review() {
    let reasoning = ScriptedReasoning::new(
        vec![AnalyzeScript::Respond(response(
            &["Part"],
            vec![mapping("Part", "part_number")],
            vec![critical_question("q1")],
            0.50,
        ))],
        Vec::new(),
    );
    let h = harness(
        reasoning,
        MockInventory::new(inventory_schema()),
        OrchestratorConfig::default(),
    )
    .await;

    let session = start_session(&h).await;
    assert_eq!(session.stage, ImportStage::Questioning);

    let err = h.orchestrator.approve(session.session_id).await.unwrap_err();
    assert!(matches!(err, ImportError::ApprovalRequired(_)));
}

// ----------------------------------------------------------------------
// Execution tests
// ----------------------------------------------------------------------

#[tokio::test]
async fn execute_aggregates_per_unit_rows() {
    let reasoning = ScriptedReasoning::new(
        Vec::new(),
        vec![
            row(1, &[("Part", "P1"), ("Serial", "S1")]),
            row(2, &[("Part", "P1"), ("Serial", "S2")]),
            row(3, &[("Part", "P2"), ("Serial", "S3")]),
        ],
    );
    let h = harness(
        reasoning,
        MockInventory::new(inventory_schema()),
        OrchestratorConfig::default(),
    )
    .await;

    let session_id = seed_processing_session(
        &h,
        &[("Part", "part_number"), ("Serial", "serial_number")],
        Vec::new(),
    )
    .await;

    let (session, outcome) = h.orchestrator.execute(session_id).await.unwrap();
    assert_eq!(session.stage, ImportStage::Complete);
    assert_eq!(outcome.created_count, 2);

    let last_write = h.inventory.last_write.lock().unwrap();
    let (rows, mappings) = last_write.as_ref().unwrap();

    // Two unique keys, quantity carried in the synthetic column
    assert_eq!(rows.len(), 2);
    let p1 = rows
        .iter()
        .find(|r| r.values["Part"] == "P1")
        .expect("P1 row");
    assert_eq!(p1.values["__aggregated_quantity"], "2");
    assert_eq!(p1.values["Serial"], "S1,S2");
    assert_eq!(
        mappings["__aggregated_quantity"].target_field,
        "quantity"
    );
}

#[tokio::test]
async fn execute_partial_write_failure_still_completes() {
    let reasoning = ScriptedReasoning::new(
        Vec::new(),
        vec![
            row(1, &[("Part", "P1"), ("Qty", "4")]),
            row(2, &[("Part", "P2"), ("Qty", "x")]),
            row(3, &[("Part", "P3"), ("Qty", "1")]),
        ],
    );
    let inventory = MockInventory::new(inventory_schema());
    *inventory.write_script.lock().unwrap() = Some(WriteOutcome {
        created_count: 2,
        rejected_rows: vec![RejectedRow {
            row_ref: 2,
            reason: "quantity is not an integer".to_string(),
        }],
    });
    let h = harness(reasoning, inventory, OrchestratorConfig::default()).await;

    let session_id = seed_processing_session(
        &h,
        &[("Part", "part_number"), ("Qty", "quantity")],
        Vec::new(),
    )
    .await;

    let (session, outcome) = h.orchestrator.execute(session_id).await.unwrap();

    assert_eq!(session.stage, ImportStage::Complete);
    assert!(session.error.is_none());
    assert_eq!(outcome.created_count, 2);
    assert_eq!(outcome.rejected_rows.len(), 1);
    assert_eq!(outcome.rejected_rows[0].row_ref, 2);
}

#[tokio::test]
async fn execute_with_zero_created_rows_fails_session() {
    let reasoning = ScriptedReasoning::new(
        Vec::new(),
        vec![row(1, &[("Part", "P1"), ("Qty", "bad")])],
    );
    let inventory = MockInventory::new(inventory_schema());
    *inventory.write_script.lock().unwrap() = Some(WriteOutcome {
        created_count: 0,
        rejected_rows: vec![RejectedRow {
            row_ref: 1,
            reason: "quantity is not an integer".to_string(),
        }],
    });
    let h = harness(reasoning, inventory, OrchestratorConfig::default()).await;

    let session_id = seed_processing_session(
        &h,
        &[("Part", "part_number"), ("Qty", "quantity")],
        Vec::new(),
    )
    .await;

    let (session, outcome) = h.orchestrator.execute(session_id).await.unwrap();

    assert_eq!(session.stage, ImportStage::Error);
    assert!(session.error.as_deref().unwrap().contains("No rows imported"));
    assert_eq!(outcome.created_count, 0);
    assert_eq!(outcome.rejected_rows.len(), 1);
}

#[tokio::test]
async fn execute_surfaces_column_fallback() {
    let reasoning = ScriptedReasoning::new(
        Vec::new(),
        vec![row(1, &[("Part", "P1"), ("Qty", "4"), ("Bin Loc", "A-3")])],
    );
    let mut inventory = MockInventory::new(inventory_schema());
    inventory.ensure_outcome = EnsureColumnOutcome::Conflict;
    let h = harness(reasoning, inventory, OrchestratorConfig::default()).await;

    let requested = RequestedColumn {
        name: "bin_loc".to_string(),
        original_name: "Bin Loc".to_string(),
        user_intent: "track shelf bins".to_string(),
        inferred_type: FieldType::Text,
        source_column: "Bin Loc".to_string(),
        approved: true,
        fallback_used: false,
    };
    let session_id = seed_processing_session(
        &h,
        &[("Part", "part_number"), ("Qty", "quantity")],
        vec![requested],
    )
    .await;

    let (session, outcome) = h.orchestrator.execute(session_id).await.unwrap();

    assert_eq!(session.stage, ImportStage::Complete);
    assert_eq!(outcome.fallback_columns, vec!["bin_loc"]);
    assert!(session.requested_new_columns[0].fallback_used);
}

#[tokio::test]
async fn empty_upload_fails_the_session() {
    let reasoning = ScriptedReasoning::new(Vec::new(), Vec::new());
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    stockwell_import::db::init_tables(&pool).await.unwrap();
    let store = SessionStore::new(pool);

    let orchestrator = ImportOrchestrator::new(
        store.clone(),
        Arc::new(reasoning),
        Arc::new(FixedObjectStore { bytes: Vec::new() }),
        Arc::new(MockInventory::new(inventory_schema())),
        Arc::new(MockMemory::empty()),
        EventBus::new(32),
        OrchestratorConfig::default(),
    );

    let session = orchestrator
        .start(
            "empty.csv".to_string(),
            "uploads/empty".to_string(),
            "text/csv".to_string(),
        )
        .await
        .unwrap();
    let session = orchestrator
        .run_first_round(session.session_id)
        .await
        .unwrap();

    assert_eq!(session.stage, ImportStage::Error);
    assert!(session.error.as_deref().unwrap().contains("empty"));
}
