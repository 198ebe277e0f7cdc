//! Pattern memory client
//!
//! Long-term key-value store of prior successful mappings, keyed by a shape
//! signature of the file. Both directions are best-effort: a lookup failure
//! degrades to defaults, a store failure is logged and swallowed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{ImportError, Result};

const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Prior knowledge for a known file shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorKnowledge {
    /// Source column → target field suggestions from past imports
    pub suggested_mappings: BTreeMap<String, String>,
    /// Added to evidence when suggestions match
    pub confidence_boost: f64,
    /// Per-shape adaptive threshold; falls back to the global default
    pub adaptive_threshold: Option<f64>,
}

/// Corrections derived from a finished session: where the final resolution
/// differed from the initial suggestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionCorrection {
    pub source_column: String,
    pub suggested_field: String,
    pub resolved_field: String,
}

/// Trait seam over the pattern-memory service
#[async_trait]
pub trait PatternMemory: Send + Sync {
    /// Look up prior knowledge for a shape signature (best-effort)
    async fn get_prior_knowledge(&self, shape_signature: &str) -> Result<Option<PriorKnowledge>>;

    /// Record the final resolution for a shape (best-effort, fire-and-forget
    /// semantics acceptable)
    async fn store_resolution(
        &self,
        shape_signature: &str,
        final_mappings: &BTreeMap<String, String>,
        corrections: &[ResolutionCorrection],
    ) -> Result<()>;
}

/// Fingerprint of a file's structural pattern
///
/// Filename extension and the ordered column names participate, so two files
/// with the same columns in the same order share a signature.
pub fn shape_signature(filename: &str, source_columns: &[String]) -> String {
    let extension = filename.rsplit('.').next().unwrap_or("").to_lowercase();

    let mut hasher = Sha256::new();
    hasher.update(extension.as_bytes());
    for column in source_columns {
        hasher.update([0u8]);
        hasher.update(column.trim().to_lowercase().as_bytes());
    }

    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// HTTP implementation of the pattern-memory contract
pub struct HttpPatternMemoryClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpPatternMemoryClient {
    pub fn new(base_url: String) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ImportError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }
}

#[async_trait]
impl PatternMemory for HttpPatternMemoryClient {
    async fn get_prior_knowledge(&self, shape_signature: &str) -> Result<Option<PriorKnowledge>> {
        let url = format!("{}/v1/patterns/{}", self.base_url, shape_signature);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| ImportError::TransientIo(format!("Pattern memory unreachable: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ImportError::TransientIo(format!(
                "Pattern memory returned {}",
                status
            )));
        }

        let knowledge = response
            .json::<PriorKnowledge>()
            .await
            .map_err(|e| ImportError::TransientIo(format!("Bad pattern response: {}", e)))?;

        Ok(Some(knowledge))
    }

    async fn store_resolution(
        &self,
        shape_signature: &str,
        final_mappings: &BTreeMap<String, String>,
        corrections: &[ResolutionCorrection],
    ) -> Result<()> {
        #[derive(Serialize)]
        struct StoreRequest<'a> {
            final_mappings: &'a BTreeMap<String, String>,
            corrections: &'a [ResolutionCorrection],
        }

        let url = format!("{}/v1/patterns/{}", self.base_url, shape_signature);

        let response = self
            .http_client
            .put(&url)
            .json(&StoreRequest {
                final_mappings,
                corrections,
            })
            .send()
            .await
            .map_err(|e| ImportError::TransientIo(format!("Pattern memory unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(ImportError::TransientIo(format!(
                "Pattern memory returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}
