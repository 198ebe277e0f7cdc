//! Configuration resolution for stockwell-import
//!
//! Multi-tier resolution with Database → ENV → TOML priority. The settings
//! table is authoritative; environment variables and the TOML file are
//! bootstrap fallbacks.

use sqlx::SqlitePool;
use tracing::{info, warn};

use stockwell_common::config::TomlConfig;
use stockwell_common::{Error, Result};

/// Resolved base URLs for the external services
#[derive(Debug, Clone)]
pub struct ServiceEndpoints {
    pub reasoning_base_url: String,
    pub object_store_base_url: String,
    pub inventory_base_url: String,
    pub pattern_memory_base_url: String,
}

impl ServiceEndpoints {
    /// Resolve endpoints from ENV → TOML → compiled defaults
    pub fn resolve(toml_config: &TomlConfig) -> Self {
        Self {
            reasoning_base_url: resolve_url(
                "STOCKWELL_REASONING_URL",
                toml_config.reasoning_base_url.as_deref(),
                "http://127.0.0.1:9500",
            ),
            object_store_base_url: resolve_url(
                "STOCKWELL_OBJECT_STORE_URL",
                toml_config.object_store_base_url.as_deref(),
                "http://127.0.0.1:9501",
            ),
            inventory_base_url: resolve_url(
                "STOCKWELL_INVENTORY_URL",
                toml_config.inventory_base_url.as_deref(),
                "http://127.0.0.1:9502",
            ),
            pattern_memory_base_url: resolve_url(
                "STOCKWELL_PATTERN_MEMORY_URL",
                toml_config.pattern_memory_base_url.as_deref(),
                "http://127.0.0.1:9503",
            ),
        }
    }
}

fn resolve_url(env_var: &str, toml_value: Option<&str>, default: &str) -> String {
    if let Ok(url) = std::env::var(env_var) {
        if !url.trim().is_empty() {
            return url.trim_end_matches('/').to_string();
        }
    }
    toml_value
        .map(|u| u.trim_end_matches('/').to_string())
        .unwrap_or_else(|| default.to_string())
}

/// Resolve the content-understanding service API key from 3-tier
/// configuration
///
/// Priority: Database → ENV → TOML
pub async fn resolve_reasoning_api_key(
    db: &SqlitePool,
    toml_config: &TomlConfig,
) -> Result<String> {
    let db_key = crate::db::settings::get_reasoning_api_key(db)
        .await
        .map_err(|e| Error::Config(format!("Failed to read settings: {}", e)))?;
    let env_key = std::env::var("STOCKWELL_REASONING_API_KEY").ok();
    let toml_key = toml_config.reasoning_api_key.clone();

    let mut sources = Vec::new();
    if db_key.as_deref().is_some_and(is_valid_key) {
        sources.push("database");
    }
    if env_key.as_deref().is_some_and(is_valid_key) {
        sources.push("environment");
    }
    if toml_key.as_deref().is_some_and(is_valid_key) {
        sources.push("TOML");
    }

    if sources.len() > 1 {
        warn!(
            "Reasoning API key found in multiple sources: {}. Using database (highest priority).",
            sources.join(", ")
        );
    }

    for (key, source) in [
        (db_key, "database"),
        (env_key, "environment variable"),
        (toml_key, "TOML config"),
    ] {
        if let Some(key) = key {
            if is_valid_key(&key) {
                info!("Reasoning API key loaded from {}", source);
                return Ok(key);
            }
        }
    }

    Err(Error::Config(
        "Reasoning API key not configured. Set it in the settings table, \
         the STOCKWELL_REASONING_API_KEY environment variable, or the \
         reasoning_api_key field of config.toml."
            .to_string(),
    ))
}

/// A usable key is non-empty after trimming
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_keys_are_invalid() {
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("   "));
        assert!(is_valid_key("sk-live-abc"));
    }

    #[test]
    fn toml_url_used_when_env_unset() {
        std::env::remove_var("STOCKWELL_REASONING_URL");
        let config = TomlConfig {
            reasoning_base_url: Some("http://reasoning.internal:8080/".to_string()),
            ..Default::default()
        };

        let endpoints = ServiceEndpoints::resolve(&config);
        assert_eq!(endpoints.reasoning_base_url, "http://reasoning.internal:8080");
    }

    #[test]
    fn defaults_fill_unconfigured_endpoints() {
        std::env::remove_var("STOCKWELL_PATTERN_MEMORY_URL");
        let endpoints = ServiceEndpoints::resolve(&TomlConfig::default());
        assert_eq!(endpoints.pattern_memory_base_url, "http://127.0.0.1:9503");
    }
}
