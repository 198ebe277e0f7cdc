//! Settings table access
//!
//! Key/value settings, authoritative over environment and TOML values.

use sqlx::SqlitePool;

use crate::error::Result;

/// Get a setting value by key
pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;

    Ok(value)
}

/// Upsert a setting value
pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get the content-understanding service API key, if configured
pub async fn get_reasoning_api_key(pool: &SqlitePool) -> Result<Option<String>> {
    get_setting(pool, "reasoning_api_key").await
}

/// Store the content-understanding service API key
pub async fn set_reasoning_api_key(pool: &SqlitePool, key: String) -> Result<()> {
    set_setting(pool, "reasoning_api_key", &key).await
}
