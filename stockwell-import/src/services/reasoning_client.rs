//! Content-understanding service client
//!
//! The reasoning service is an external oracle: given the uploaded bytes'
//! storage key plus all accumulated context, it returns column analysis,
//! mapping suggestions, confidence scores, and clarification questions. Its
//! internal reasoning is opaque; only this request/response contract matters.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{ImportError, Result};
use crate::models::{
    ClarificationQuestion, ColumnMapping, ConfidenceReport, FileAnalysis, SchemaColumn,
    SourceRow, TraceEntry,
};
use crate::services::pattern_memory_client::PriorKnowledge;

const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Analysis request: the full accumulated context is threaded explicitly on
/// every round rather than trusting previously shared state to have settled
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeRequest {
    pub storage_key: String,
    pub filename: String,
    pub content_type: String,
    /// Previous round's structural summary, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_analysis: Option<FileAnalysis>,
    /// Live target schema at the time of the call
    pub live_schema: Vec<SchemaColumn>,
    /// Pattern-memory suggestions for this file shape
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior_knowledge: Option<PriorKnowledge>,
    /// Every answer accumulated so far, across all rounds
    pub accumulated_answers: BTreeMap<String, String>,
    /// Every free-text instruction accumulated so far
    pub accumulated_instructions: BTreeMap<String, String>,
}

/// Analysis response for one round
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalyzeResponse {
    pub file_analysis: FileAnalysis,
    pub column_mappings: Vec<ColumnMapping>,
    /// Pending questions for the next round; empty signals readiness
    pub questions: Vec<ClarificationQuestion>,
    pub confidence: ConfidenceReport,
    /// Appended to the session's reasoning trace, never replacing it
    pub reasoning_trace_delta: Vec<TraceEntry>,
}

/// Trait seam over the content-understanding service
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Analyze (or re-analyze) the file with the accumulated context
    async fn analyze(&self, request: AnalyzeRequest) -> Result<AnalyzeResponse>;

    /// Extract data rows using the resolved column mappings
    ///
    /// Extraction lives behind this contract because the sources are
    /// heterogeneous; a scanned document cannot be parsed locally.
    async fn extract_rows(
        &self,
        storage_key: &str,
        column_mappings: &BTreeMap<String, ColumnMapping>,
    ) -> Result<Vec<SourceRow>>;
}

/// HTTP implementation of the reasoning contract
pub struct HttpReasoningClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpReasoningClient {
    pub fn new(base_url: String, api_key: String) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ImportError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
            api_key,
        })
    }

    async fn post_json<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!(url = %url, "Calling reasoning service");

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ImportError::TransientIo(format!("Reasoning service timeout: {}", e))
                } else {
                    ImportError::TransientIo(format!("Reasoning service unreachable: {}", e))
                }
            })?;

        let status = response.status();

        if status.is_server_error() {
            return Err(ImportError::TransientIo(format!(
                "Reasoning service returned {}",
                status
            )));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ImportError::Reasoning(format!(
                "Reasoning service rejected request ({}): {}",
                status, detail
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ImportError::Reasoning(format!("Unusable reasoning response: {}", e)))
    }
}

#[async_trait]
impl ReasoningService for HttpReasoningClient {
    async fn analyze(&self, request: AnalyzeRequest) -> Result<AnalyzeResponse> {
        let response: AnalyzeResponse = self.post_json("/v1/analyze", &request).await?;

        // A confidence score outside [0,1] means the response is unusable,
        // not that the session failed
        if !(0.0..=1.0).contains(&response.confidence.overall) {
            return Err(ImportError::Reasoning(format!(
                "Confidence out of range: {}",
                response.confidence.overall
            )));
        }

        Ok(response)
    }

    async fn extract_rows(
        &self,
        storage_key: &str,
        column_mappings: &BTreeMap<String, ColumnMapping>,
    ) -> Result<Vec<SourceRow>> {
        #[derive(Serialize)]
        struct ExtractRequest<'a> {
            storage_key: &'a str,
            column_mappings: &'a BTreeMap<String, ColumnMapping>,
        }

        #[derive(Deserialize)]
        struct ExtractResponse {
            rows: Vec<SourceRow>,
        }

        let response: ExtractResponse = self
            .post_json(
                "/v1/extract",
                &ExtractRequest {
                    storage_key,
                    column_mappings,
                },
            )
            .await?;

        Ok(response.rows)
    }
}
