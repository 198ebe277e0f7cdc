//! Structured inventory store client
//!
//! The relational store that finally receives imported rows. Row-level
//! rejections are data, not errors: a partial write returns both the created
//! count and the rejected rows with per-row reasons.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{ImportError, Result};
use crate::models::{ColumnMapping, FieldType, SchemaColumn, SourceRow, WriteOutcome};

const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Result of attempting to add a column to the live schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureColumnOutcome {
    Created,
    /// Naming conflict or concurrent modification; caller falls back to the
    /// generic structured side-field
    Conflict,
}

/// Trait seam over the structured data store
#[async_trait]
pub trait StructuredStore: Send + Sync {
    /// Current live schema of the target table
    async fn live_schema(&self, table: &str) -> Result<Vec<SchemaColumn>>;

    /// Add a column to the live schema
    async fn ensure_column(
        &self,
        table: &str,
        name: &str,
        field_type: FieldType,
    ) -> Result<EnsureColumnOutcome>;

    /// Write rows under the resolved mappings; partial failure is a normal
    /// outcome, not an error
    async fn write_rows(
        &self,
        table: &str,
        rows: &[SourceRow],
        column_mappings: &BTreeMap<String, ColumnMapping>,
    ) -> Result<WriteOutcome>;
}

/// HTTP implementation of the structured store contract
pub struct HttpInventoryClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpInventoryClient {
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

    fn classify(status: reqwest::StatusCode, detail: String) -> ImportError {
        if status.is_server_error() {
            ImportError::TransientIo(format!("Inventory store returned {}", status))
        } else {
            // 4xx from the store is a validation-class failure; never retried
            ImportError::Validation(format!("Inventory store rejected request: {}", detail))
        }
    }
}

#[async_trait]
impl StructuredStore for HttpInventoryClient {
    async fn live_schema(&self, table: &str) -> Result<Vec<SchemaColumn>> {
        let url = format!("{}/v1/tables/{}/schema", self.base_url, table);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| ImportError::TransientIo(format!("Inventory store unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Self::classify(status, detail));
        }

        #[derive(Deserialize)]
        struct SchemaResponse {
            columns: Vec<SchemaColumn>,
        }

        let schema: SchemaResponse = response
            .json()
            .await
            .map_err(|e| ImportError::TransientIo(format!("Bad schema response: {}", e)))?;

        Ok(schema.columns)
    }

    async fn ensure_column(
        &self,
        table: &str,
        name: &str,
        field_type: FieldType,
    ) -> Result<EnsureColumnOutcome> {
        #[derive(Serialize)]
        struct EnsureColumnRequest<'a> {
            name: &'a str,
            field_type: &'a str,
        }

        let url = format!("{}/v1/tables/{}/columns", self.base_url, table);

        let response = self
            .http_client
            .post(&url)
            .json(&EnsureColumnRequest {
                name,
                field_type: field_type.as_str(),
            })
            .send()
            .await
            .map_err(|e| ImportError::TransientIo(format!("Inventory store unreachable: {}", e)))?;

        let status = response.status();

        if status == reqwest::StatusCode::CONFLICT {
            return Ok(EnsureColumnOutcome::Conflict);
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Self::classify(status, detail));
        }

        Ok(EnsureColumnOutcome::Created)
    }

    async fn write_rows(
        &self,
        table: &str,
        rows: &[SourceRow],
        column_mappings: &BTreeMap<String, ColumnMapping>,
    ) -> Result<WriteOutcome> {
        #[derive(Serialize)]
        struct WriteRequest<'a> {
            rows: &'a [SourceRow],
            column_mappings: &'a BTreeMap<String, ColumnMapping>,
        }

        let url = format!("{}/v1/tables/{}/rows", self.base_url, table);

        let response = self
            .http_client
            .post(&url)
            .json(&WriteRequest {
                rows,
                column_mappings,
            })
            .send()
            .await
            .map_err(|e| ImportError::TransientIo(format!("Inventory store unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Self::classify(status, detail));
        }

        response
            .json::<WriteOutcome>()
            .await
            .map_err(|e| ImportError::TransientIo(format!("Bad write response: {}", e)))
    }
}
