//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// TOML configuration file contents
///
/// Lives at the platform config dir (e.g. `~/.config/stockwell/config.toml`).
/// All fields are optional; the database settings table and environment
/// variables take priority over this file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder override (database and working files live here)
    pub root_folder: Option<String>,

    /// Content-understanding service base URL
    pub reasoning_base_url: Option<String>,

    /// Content-understanding service API key
    pub reasoning_api_key: Option<String>,

    /// Object storage service base URL
    pub object_store_base_url: Option<String>,

    /// Structured inventory store base URL
    pub inventory_base_url: Option<String>,

    /// Pattern memory service base URL
    pub pattern_memory_base_url: Option<String>,
}

/// Load the TOML config file if present, otherwise defaults
pub fn load_toml_config() -> TomlConfig {
    match config_file_path() {
        Ok(path) if path.exists() => match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}", path.display(), e);
                    TomlConfig::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", path.display(), e);
                TomlConfig::default()
            }
        },
        _ => TomlConfig::default(),
    }
}

/// Write TOML config atomically (write temp file, then rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;

    Ok(())
}

/// Root folder resolution priority order:
/// 1. Environment variable (STOCKWELL_ROOT)
/// 2. TOML config file
/// 3. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(toml_config: &TomlConfig) -> PathBuf {
    if let Ok(path) = std::env::var("STOCKWELL_ROOT") {
        return PathBuf::from(path);
    }

    if let Some(path) = &toml_config.root_folder {
        return PathBuf::from(path);
    }

    default_root_folder()
}

/// Ensure the root folder exists, returning the database path inside it
pub fn ensure_root_folder(root: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(root)?;
    Ok(root.join("stockwell.db"))
}

/// Get default configuration file path for the platform
pub fn config_file_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join("stockwell").join("config.toml"))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("stockwell"))
        .unwrap_or_else(|| PathBuf::from("./stockwell_data"))
}
