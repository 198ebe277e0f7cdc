//! Session store: durable SQLite persistence with a read-through cache
//!
//! The cache is never the source of truth. Writes go to SQLite first and the
//! cache is updated only after the write succeeds; loads fall back to SQLite
//! on a miss. Concurrent writers for the same session are serialized by a
//! compare-and-swap on `updated_at`: a stale write is rejected with
//! `Conflict` and the caller must reload and retry.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::sessions;
use crate::error::{ImportError, Result};
use crate::models::{ImportSession, SESSION_TTL_HOURS};

#[derive(Clone)]
pub struct SessionStore {
    db: SqlitePool,
    cache: Arc<RwLock<HashMap<Uuid, ImportSession>>>,
}

impl SessionStore {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            db,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Persist a freshly created session and return its id
    pub async fn create(&self, session: &ImportSession) -> Result<Uuid> {
        sessions::insert_session(&self.db, session).await?;
        self.cache
            .write()
            .await
            .insert(session.session_id, session.clone());

        tracing::debug!(session_id = %session.session_id, "Session created");
        Ok(session.session_id)
    }

    /// Load a session; an expired session is reported as not found
    pub async fn load(&self, session_id: Uuid) -> Result<ImportSession> {
        let now = Utc::now();

        if let Some(cached) = self.cache.read().await.get(&session_id) {
            if !cached.is_expired(now) {
                return Ok(cached.clone());
            }
        }

        let session = sessions::fetch_session(&self.db, session_id)
            .await?
            .ok_or_else(|| {
                ImportError::NotFound(format!("Import session not found: {}", session_id))
            })?;

        if session.is_expired(now) {
            self.cache.write().await.remove(&session_id);
            return Err(ImportError::NotFound(format!(
                "Import session expired: {} - please start a new import",
                session_id
            )));
        }

        self.cache
            .write()
            .await
            .insert(session_id, session.clone());
        Ok(session)
    }

    /// Full-record save guarded by compare-and-swap on `updated_at`
    ///
    /// `expected_updated_at` is the token observed at load time. The session's
    /// own `updated_at` must already be bumped past it by the mutation; a
    /// stale expectation means another writer got there first.
    ///
    /// Every successful save renews the TTL window, so an active session
    /// never expires under the user mid-workflow.
    pub async fn save(
        &self,
        session: &ImportSession,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut session = session.clone();
        session.expires_at = Utc::now() + chrono::Duration::hours(SESSION_TTL_HOURS);

        let replaced = sessions::update_session(&self.db, &session, expected_updated_at).await?;

        if !replaced {
            // Distinguish a stale write from a deleted/expired session
            return if sessions::session_exists(&self.db, session.session_id).await? {
                Err(ImportError::Conflict(format!(
                    "Session {} was modified concurrently",
                    session.session_id
                )))
            } else {
                Err(ImportError::NotFound(format!(
                    "Import session not found: {}",
                    session.session_id
                )))
            };
        }

        self.cache
            .write()
            .await
            .insert(session.session_id, session.clone());
        Ok(())
    }

    /// Delete a session wholesale
    pub async fn delete(&self, session_id: Uuid) -> Result<()> {
        sessions::delete_session(&self.db, session_id).await?;
        self.cache.write().await.remove(&session_id);
        Ok(())
    }

    /// Garbage-collect expired sessions; safe against in-flight mutations
    /// because those fail their CAS (row gone) with a not-found result
    pub async fn cleanup_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let removed = sessions::delete_expired_sessions(&self.db, now).await?;

        if removed > 0 {
            let mut cache = self.cache.write().await;
            cache.retain(|_, s| !s.is_expired(now));
            tracing::info!(removed = removed, "Expired import sessions removed");
        }

        Ok(removed)
    }

    /// Startup cleanup: mark sessions orphaned by a previous run as failed
    pub async fn fail_stale_on_startup(&self) -> Result<usize> {
        let failed = sessions::fail_stale_sessions(&self.db).await?;
        if failed > 0 {
            tracing::warn!(count = failed, "Stale sessions from previous run marked failed");
        }
        Ok(failed)
    }
}
