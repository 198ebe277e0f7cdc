//! Database access for stockwell-import
//!
//! SQLite is the durable home of session state: every orchestrator mutation
//! is saved here before a response is returned, so a retried request against
//! a different process instance observes the latest state.

pub mod sessions;
pub mod settings;
pub mod store;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

pub use store::SessionStore;

/// Initialize database connection pool
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Initialize stockwell-import specific tables
///
/// Creates import_sessions and settings tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_sessions (
            session_id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            storage_key TEXT NOT NULL,
            content_type TEXT NOT NULL,
            stage TEXT NOT NULL,
            round INTEGER NOT NULL DEFAULT 0,
            file_analysis TEXT,
            reasoning_trace TEXT NOT NULL DEFAULT '[]',
            questions TEXT NOT NULL DEFAULT '[]',
            answers TEXT NOT NULL DEFAULT '{}',
            ai_instructions TEXT NOT NULL DEFAULT '{}',
            learned_mappings TEXT NOT NULL DEFAULT '{}',
            requested_new_columns TEXT NOT NULL DEFAULT '[]',
            column_mappings TEXT NOT NULL DEFAULT '{}',
            column_decisions TEXT NOT NULL DEFAULT '{}',
            confidence TEXT,
            error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (settings, import_sessions)");

    Ok(())
}
