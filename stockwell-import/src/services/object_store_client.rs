//! Object storage client
//!
//! Uploads are direct-to-storage: the client asks for an upload URL, the
//! browser PUTs the bytes, and the import service only ever reads them back
//! by storage key.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ImportError, Result};

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Where the client should PUT the file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadTarget {
    pub upload_url: String,
    pub storage_key: String,
}

/// Trait seam over object storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Issue a direct-upload URL for a new file
    async fn get_upload_url(&self, filename: &str, content_type: &str) -> Result<UploadTarget>;

    /// Read uploaded bytes back; also serves as the upload confirmation:
    /// the session must not leave `uploading` until this succeeds
    async fn read(&self, storage_key: &str) -> Result<Vec<u8>>;
}

/// HTTP implementation of the object storage contract
pub struct HttpObjectStoreClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpObjectStoreClient {
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
impl ObjectStore for HttpObjectStoreClient {
    async fn get_upload_url(&self, filename: &str, content_type: &str) -> Result<UploadTarget> {
        #[derive(Serialize)]
        struct UploadUrlRequest<'a> {
            filename: &'a str,
            content_type: &'a str,
        }

        let url = format!("{}/v1/upload-url", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .json(&UploadUrlRequest {
                filename,
                content_type,
            })
            .send()
            .await
            .map_err(|e| ImportError::TransientIo(format!("Object storage unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(ImportError::TransientIo(format!(
                "Object storage returned {}",
                response.status()
            )));
        }

        response
            .json::<UploadTarget>()
            .await
            .map_err(|e| ImportError::TransientIo(format!("Bad upload-url response: {}", e)))
    }

    async fn read(&self, storage_key: &str) -> Result<Vec<u8>> {
        let url = format!("{}/v1/objects/{}", self.base_url, storage_key);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| ImportError::TransientIo(format!("Object storage unreachable: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ImportError::NotFound(format!(
                "Uploaded file not found in storage: {}",
                storage_key
            )));
        }
        if !status.is_success() {
            return Err(ImportError::TransientIo(format!(
                "Object storage returned {}",
                status
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ImportError::TransientIo(format!("Object read failed: {}", e)))?;

        Ok(bytes.to_vec())
    }
}
