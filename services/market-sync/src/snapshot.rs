//! Snapshot source
//!
//! The pull side of the sync engine. A snapshot is the authoritative full
//! collection as served by `GET {base}/api/entries?limit=N`:
//!
//! ```json
//! {"success": true, "data": [ ...entry records... ], "count": 100}
//! {"success": false, "error": "database unavailable"}
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use types::entry::EntryRecord;
use types::errors::FetchError;

/// Response body of the snapshot endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotResponse {
    pub success: bool,
    #[serde(default)]
    pub data: Vec<EntryRecord>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub count: Option<u64>,
}

impl SnapshotResponse {
    /// Successful response carrying `data`.
    pub fn ok(data: Vec<EntryRecord>) -> Self {
        let count = Some(data.len() as u64);
        Self {
            success: true,
            data,
            error: None,
            count,
        }
    }

    /// Unwrap the records; `success: false` is a rejection carrying the
    /// server's error text.
    pub fn into_records(self) -> Result<Vec<EntryRecord>, FetchError> {
        if self.success {
            Ok(self.data)
        } else {
            Err(FetchError::Rejected(
                self.error.unwrap_or_else(|| "unknown error".to_string()),
            ))
        }
    }
}

/// Anything that can serve a full snapshot.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self, limit: usize) -> Result<SnapshotResponse, FetchError>;
}

/// Snapshot source backed by the HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpSnapshotSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSnapshotSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn url(&self, limit: usize) -> String {
        format!("{}/api/entries?limit={}", self.base_url, limit)
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch(&self, limit: usize) -> Result<SnapshotResponse, FetchError> {
        let url = self.url(limit);
        debug!(%url, "Fetching snapshot");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        response
            .json::<SnapshotResponse>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}
