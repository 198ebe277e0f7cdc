//! Import session database operations
//!
//! Full-record persistence: every structured field is serialized to a JSON
//! text column; `updated_at` is the optimistic-lock token.

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

use crate::error::{ImportError, Result};
use crate::models::ImportSession;

/// Insert a freshly created session
///
/// Session ids are never reused, so a key collision is an internal fault.
pub async fn insert_session(pool: &SqlitePool, session: &ImportSession) -> Result<()> {
    let row = SessionRow::encode(session)?;

    sqlx::query(
        r#"
        INSERT INTO import_sessions (
            session_id, filename, storage_key, content_type, stage, round,
            file_analysis, reasoning_trace, questions, answers, ai_instructions,
            learned_mappings, requested_new_columns, column_mappings,
            column_decisions, confidence, error, created_at, updated_at, expires_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&row.session_id)
    .bind(&row.filename)
    .bind(&row.storage_key)
    .bind(&row.content_type)
    .bind(&row.stage)
    .bind(row.round)
    .bind(&row.file_analysis)
    .bind(&row.reasoning_trace)
    .bind(&row.questions)
    .bind(&row.answers)
    .bind(&row.ai_instructions)
    .bind(&row.learned_mappings)
    .bind(&row.requested_new_columns)
    .bind(&row.column_mappings)
    .bind(&row.column_decisions)
    .bind(&row.confidence)
    .bind(&row.error)
    .bind(&row.created_at)
    .bind(&row.updated_at)
    .bind(&row.expires_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Replace the full record, guarded by compare-and-swap on `updated_at`
///
/// Returns `Ok(true)` when the row was replaced, `Ok(false)` when the guard
/// did not match (stale write or missing row); the caller decides between
/// `Conflict` and `NotFound`.
pub async fn update_session(
    pool: &SqlitePool,
    session: &ImportSession,
    expected_updated_at: DateTime<Utc>,
) -> Result<bool> {
    let row = SessionRow::encode(session)?;

    let result = sqlx::query(
        r#"
        UPDATE import_sessions SET
            stage = ?,
            round = ?,
            file_analysis = ?,
            reasoning_trace = ?,
            questions = ?,
            answers = ?,
            ai_instructions = ?,
            learned_mappings = ?,
            requested_new_columns = ?,
            column_mappings = ?,
            column_decisions = ?,
            confidence = ?,
            error = ?,
            updated_at = ?,
            expires_at = ?
        WHERE session_id = ? AND updated_at = ?
        "#,
    )
    .bind(&row.stage)
    .bind(row.round)
    .bind(&row.file_analysis)
    .bind(&row.reasoning_trace)
    .bind(&row.questions)
    .bind(&row.answers)
    .bind(&row.ai_instructions)
    .bind(&row.learned_mappings)
    .bind(&row.requested_new_columns)
    .bind(&row.column_mappings)
    .bind(&row.column_decisions)
    .bind(&row.confidence)
    .bind(&row.error)
    .bind(&row.updated_at)
    .bind(&row.expires_at)
    .bind(&row.session_id)
    .bind(expected_updated_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Load a session by id, expired or not; TTL filtering is the store's job
pub async fn fetch_session(pool: &SqlitePool, session_id: Uuid) -> Result<Option<ImportSession>> {
    let row = sqlx::query(
        r#"
        SELECT session_id, filename, storage_key, content_type, stage, round,
               file_analysis, reasoning_trace, questions, answers, ai_instructions,
               learned_mappings, requested_new_columns, column_mappings,
               column_decisions, confidence, error, created_at, updated_at, expires_at
        FROM import_sessions
        WHERE session_id = ?
        "#,
    )
    .bind(session_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|r| decode_session(&r)).transpose()
}

/// Whether a session row exists at all (used to distinguish a stale write
/// from a deleted session)
pub async fn session_exists(pool: &SqlitePool, session_id: Uuid) -> Result<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM import_sessions WHERE session_id = ?")
            .bind(session_id.to_string())
            .fetch_one(pool)
            .await?;

    Ok(count > 0)
}

/// Delete a session wholesale
pub async fn delete_session(pool: &SqlitePool, session_id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM import_sessions WHERE session_id = ?")
        .bind(session_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Garbage-collect TTL-expired sessions wholesale
pub async fn delete_expired_sessions(pool: &SqlitePool, now: DateTime<Utc>) -> Result<usize> {
    let result = sqlx::query("DELETE FROM import_sessions WHERE expires_at <= ?")
        .bind(now.to_rfc3339())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() as usize)
}

/// Mark stale non-terminal sessions failed on startup
///
/// Any session not in a terminal stage when the service starts is from a
/// previous run; its background work died with the process and will never
/// progress. The human-readable reason tells the user to restart the import.
pub async fn fail_stale_sessions(pool: &SqlitePool) -> Result<usize> {
    let result = sqlx::query(
        r#"
        UPDATE import_sessions
        SET stage = '"error"',
            error = 'Import interrupted by service restart - please start a new import',
            updated_at = ?
        WHERE stage NOT IN ('"complete"', '"error"')
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}

/// Column values prepared before touching the database connection
struct SessionRow {
    session_id: String,
    filename: String,
    storage_key: String,
    content_type: String,
    stage: String,
    round: i64,
    file_analysis: Option<String>,
    reasoning_trace: String,
    questions: String,
    answers: String,
    ai_instructions: String,
    learned_mappings: String,
    requested_new_columns: String,
    column_mappings: String,
    column_decisions: String,
    confidence: Option<String>,
    error: Option<String>,
    created_at: String,
    updated_at: String,
    expires_at: String,
}

impl SessionRow {
    fn encode(session: &ImportSession) -> Result<Self> {
        Ok(Self {
            session_id: session.session_id.to_string(),
            filename: session.filename.clone(),
            storage_key: session.storage_key.clone(),
            content_type: session.content_type.clone(),
            stage: serde_json::to_string(&session.stage)?,
            round: session.round as i64,
            file_analysis: session
                .file_analysis
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            reasoning_trace: serde_json::to_string(&session.reasoning_trace)?,
            questions: serde_json::to_string(&session.questions)?,
            answers: serde_json::to_string(&session.answers)?,
            ai_instructions: serde_json::to_string(&session.ai_instructions)?,
            learned_mappings: serde_json::to_string(&session.learned_mappings)?,
            requested_new_columns: serde_json::to_string(&session.requested_new_columns)?,
            column_mappings: serde_json::to_string(&session.column_mappings)?,
            column_decisions: serde_json::to_string(&session.column_decisions)?,
            confidence: session
                .confidence
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            error: session.error.clone(),
            created_at: session.created_at.to_rfc3339(),
            updated_at: session.updated_at.to_rfc3339(),
            expires_at: session.expires_at.to_rfc3339(),
        })
    }
}

fn decode_session(row: &SqliteRow) -> Result<ImportSession> {
    let session_id_str: String = row.get("session_id");
    let session_id = Uuid::parse_str(&session_id_str)
        .map_err(|e| ImportError::Internal(format!("Failed to parse session_id: {}", e)))?;

    let stage: String = row.get("stage");
    let stage = serde_json::from_str(&stage)?;

    let file_analysis: Option<String> = row.get("file_analysis");
    let file_analysis = file_analysis
        .map(|s| serde_json::from_str(&s))
        .transpose()?;

    let confidence: Option<String> = row.get("confidence");
    let confidence = confidence.map(|s| serde_json::from_str(&s)).transpose()?;

    let reasoning_trace: String = row.get("reasoning_trace");
    let questions: String = row.get("questions");
    let answers: String = row.get("answers");
    let ai_instructions: String = row.get("ai_instructions");
    let learned_mappings: String = row.get("learned_mappings");
    let requested_new_columns: String = row.get("requested_new_columns");
    let column_mappings: String = row.get("column_mappings");
    let column_decisions: String = row.get("column_decisions");

    Ok(ImportSession {
        session_id,
        filename: row.get("filename"),
        storage_key: row.get("storage_key"),
        content_type: row.get("content_type"),
        stage,
        round: row.get::<i64, _>("round") as u32,
        file_analysis,
        reasoning_trace: serde_json::from_str(&reasoning_trace)?,
        questions: serde_json::from_str(&questions)?,
        answers: serde_json::from_str(&answers)?,
        ai_instructions: serde_json::from_str(&ai_instructions)?,
        learned_mappings: serde_json::from_str(&learned_mappings)?,
        requested_new_columns: serde_json::from_str(&requested_new_columns)?,
        column_mappings: serde_json::from_str(&column_mappings)?,
        column_decisions: serde_json::from_str(&column_decisions)?,
        confidence,
        error: row.get("error"),
        created_at: parse_timestamp(row, "created_at")?,
        updated_at: parse_timestamp(row, "updated_at")?,
        expires_at: parse_timestamp(row, "expires_at")?,
    })
}

fn parse_timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let value: String = row.get(column);
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ImportError::Internal(format!("Failed to parse {}: {}", column, e)))
}
