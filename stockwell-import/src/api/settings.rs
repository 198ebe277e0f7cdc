//! Settings API endpoint
//!
//! POST /settings/reasoning_api_key stores the content-understanding
//! service key. The settings table is authoritative; the TOML file is
//! synced best-effort as a bootstrap backup.

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Request payload for setting the reasoning API key
#[derive(Debug, Deserialize)]
pub struct SetApiKeyRequest {
    pub api_key: String,
}

/// Response payload for API key configuration
#[derive(Debug, Serialize)]
pub struct SetApiKeyResponse {
    pub success: bool,
    pub message: String,
}

/// POST /settings/reasoning_api_key handler
///
/// Validates the key, writes it to the database (authoritative), then
/// syncs it to the TOML config. TOML write failures log a warning but do
/// not fail the request.
pub async fn set_reasoning_api_key(
    State(state): State<AppState>,
    Json(payload): Json<SetApiKeyRequest>,
) -> ApiResult<Json<SetApiKeyResponse>> {
    if !crate::config::is_valid_key(&payload.api_key) {
        return Err(ApiError::BadRequest(
            "API key cannot be empty or whitespace-only".to_string(),
        ));
    }

    crate::db::settings::set_reasoning_api_key(&state.db, payload.api_key.clone())
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to save API key: {}", e)))?;

    info!("Reasoning API key configured via settings API");

    // Best-effort TOML sync so a wiped database can still bootstrap
    let mut toml_config = stockwell_common::config::load_toml_config();
    toml_config.reasoning_api_key = Some(payload.api_key);
    match stockwell_common::config::config_file_path() {
        Ok(path) => {
            if let Err(e) = stockwell_common::config::write_toml_config(&toml_config, &path) {
                warn!("TOML sync failed (database write succeeded): {}", e);
            }
        }
        Err(e) => warn!("TOML sync skipped, no config path: {}", e),
    }

    Ok(Json(SetApiKeyResponse {
        success: true,
        message: "Reasoning API key configured successfully".to_string(),
    }))
}

/// Build settings routes
pub fn settings_routes() -> Router<AppState> {
    Router::new().route("/settings/reasoning_api_key", post(set_reasoning_api_key))
}
