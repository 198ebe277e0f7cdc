//! Import session API handlers
//!
//! POST /import/upload-url, POST /import/start, GET/POST under
//! /import/sessions/{session_id} for the clarification loop, review gate,
//! and execution.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{
    ClarificationQuestion, ColumnMapping, ConfidenceReport, FieldType, ImportOutcome,
    ImportSession, ImportStage, RequestedColumn, UnmappedDecision,
};
use crate::services::answer_merger::AnswerBatch;
use crate::services::object_store_client::UploadTarget;
use crate::AppState;

/// POST /import/upload-url request
#[derive(Debug, Deserialize)]
pub struct UploadUrlRequest {
    pub filename: String,
    pub content_type: String,
}

/// POST /import/start request
#[derive(Debug, Deserialize)]
pub struct StartImportRequest {
    pub filename: String,
    pub storage_key: String,
    pub content_type: String,
}

/// POST /import/start response
#[derive(Debug, Serialize)]
pub struct StartImportResponse {
    pub session_id: Uuid,
    pub stage: ImportStage,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Session view returned by the session endpoints
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub filename: String,
    pub stage: ImportStage,
    pub round: u32,
    pub questions: Vec<ClarificationQuestion>,
    pub column_mappings: Vec<ColumnMapping>,
    /// Source columns still needing an ignore/fallback/new-column decision
    pub undecided_columns: Vec<String>,
    pub requested_new_columns: Vec<RequestedColumn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<ConfidenceReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

impl From<ImportSession> for SessionResponse {
    fn from(session: ImportSession) -> Self {
        let undecided_columns = session.undecided_columns();
        Self {
            session_id: session.session_id,
            filename: session.filename,
            stage: session.stage,
            round: session.round,
            questions: session.questions,
            column_mappings: session.column_mappings.into_values().collect(),
            undecided_columns,
            requested_new_columns: session.requested_new_columns,
            confidence: session.confidence,
            error: session.error,
            updated_at: session.updated_at,
            expires_at: session.expires_at,
        }
    }
}

/// POST .../answers request
#[derive(Debug, Deserialize)]
pub struct SubmitAnswersRequest {
    #[serde(flatten)]
    pub batch: AnswerBatch,
    /// Explicit opt-in: treat defaulted questions as answered
    #[serde(default)]
    pub skip_with_defaults: bool,
}

/// POST .../columns/{column}/decision request
#[derive(Debug, Deserialize)]
pub struct ColumnDecisionRequest {
    #[serde(flatten)]
    pub decision: UnmappedDecision,
    pub user_intent: Option<String>,
    pub inferred_type: Option<FieldType>,
}

/// POST .../columns/approve request
#[derive(Debug, Deserialize)]
pub struct ApproveColumnsRequest {
    pub names: Vec<String>,
}

/// POST .../execute response
#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub session_id: Uuid,
    pub stage: ImportStage,
    #[serde(flatten)]
    pub outcome: ImportOutcome,
}

/// POST /import/upload-url
///
/// Issue a direct-to-storage upload URL. The service never proxies bytes.
pub async fn get_upload_url(
    State(state): State<AppState>,
    Json(request): Json<UploadUrlRequest>,
) -> ApiResult<Json<UploadTarget>> {
    if request.filename.trim().is_empty() {
        return Err(ApiError::BadRequest("filename must not be empty".to_string()));
    }

    let target = state
        .orchestrator
        .upload_target(&request.filename, &request.content_type)
        .await?;

    Ok(Json(target))
}

/// POST /import/start
///
/// Create the session and kick off the first analysis round in the
/// background; clients follow progress via GET or the SSE stream.
pub async fn start_import(
    State(state): State<AppState>,
    Json(request): Json<StartImportRequest>,
) -> ApiResult<Json<StartImportResponse>> {
    if request.storage_key.trim().is_empty() {
        return Err(ApiError::BadRequest("storage_key must not be empty".to_string()));
    }

    let session = state
        .orchestrator
        .start(request.filename, request.storage_key, request.content_type)
        .await?;

    let response = StartImportResponse {
        session_id: session.session_id,
        stage: session.stage,
        created_at: session.created_at,
    };

    let orchestrator = state.orchestrator.clone();
    let last_error = state.last_error.clone();
    let session_id = session.session_id;
    tokio::spawn(async move {
        if let Err(e) = orchestrator.run_first_round(session_id).await {
            tracing::error!(
                session_id = %session_id,
                error = %e,
                "First analysis round failed"
            );
            *last_error.write().await = Some(e.to_string());
        }
    });

    Ok(Json(response))
}

/// GET /import/sessions/{session_id}
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<SessionResponse>> {
    let session = state.orchestrator.get_session(session_id).await?;
    Ok(Json(session.into()))
}

/// GET /import/sessions/{session_id}/questions
pub async fn get_questions(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<Vec<ClarificationQuestion>>> {
    let questions = state.orchestrator.get_questions(session_id).await?;
    Ok(Json(questions))
}

/// POST /import/sessions/{session_id}/answers
///
/// Merge an answer batch and trigger re-analysis with the accumulated
/// context. Returns the session after the round settles.
pub async fn submit_answers(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<SubmitAnswersRequest>,
) -> ApiResult<Json<SessionResponse>> {
    let session = state
        .orchestrator
        .submit_answers(session_id, request.batch, request.skip_with_defaults)
        .await?;
    Ok(Json(session.into()))
}

/// POST /import/sessions/{session_id}/columns/{column}/decision
pub async fn decide_column(
    State(state): State<AppState>,
    Path((session_id, column)): Path<(Uuid, String)>,
    Json(request): Json<ColumnDecisionRequest>,
) -> ApiResult<Json<SessionResponse>> {
    let session = state
        .orchestrator
        .decide_column(
            session_id,
            &column,
            request.decision,
            request.user_intent,
            request.inferred_type,
        )
        .await?;
    Ok(Json(session.into()))
}

/// POST /import/sessions/{session_id}/columns/approve
pub async fn approve_columns(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<ApproveColumnsRequest>,
) -> ApiResult<Json<SessionResponse>> {
    let session = state
        .orchestrator
        .approve_new_columns(session_id, &request.names)
        .await?;
    Ok(Json(session.into()))
}

/// POST /import/sessions/{session_id}/approve
///
/// The human approval gate; 409 if any question, decision, or requested
/// column is still unresolved.
pub async fn approve_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<SessionResponse>> {
    let session = state.orchestrator.approve(session_id).await?;
    Ok(Json(session.into()))
}

/// POST /import/sessions/{session_id}/execute
///
/// Run the approved import to completion and report created/rejected rows.
pub async fn execute_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<ExecuteResponse>> {
    let (session, outcome) = state.orchestrator.execute(session_id).await?;
    Ok(Json(ExecuteResponse {
        session_id: session.session_id,
        stage: session.stage,
        outcome,
    }))
}

/// Build import workflow routes
pub fn import_routes() -> Router<AppState> {
    Router::new()
        .route("/import/upload-url", post(get_upload_url))
        .route("/import/start", post(start_import))
        .route("/import/sessions/:session_id", get(get_session))
        .route("/import/sessions/:session_id/questions", get(get_questions))
        .route("/import/sessions/:session_id/answers", post(submit_answers))
        .route(
            "/import/sessions/:session_id/columns/:column/decision",
            post(decide_column),
        )
        .route(
            "/import/sessions/:session_id/columns/approve",
            post(approve_columns),
        )
        .route("/import/sessions/:session_id/approve", post(approve_session))
        .route("/import/sessions/:session_id/execute", post(execute_session))
}
