//! Worker control client
//!
//! Fire-and-forget start/stop/run-once/status calls to named worker
//! processes (e.g. the scraper feeding the snapshot endpoint). Results are
//! only ever surfaced as log records.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use types::errors::FetchError;

/// Action sent to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerAction {
    Start,
    Stop,
    RunOnce,
    Status,
}

impl WorkerAction {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerAction::Start => "start",
            WorkerAction::Stop => "stop",
            WorkerAction::RunOnce => "run-once",
            WorkerAction::Status => "status",
        }
    }
}

impl FromStr for WorkerAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(WorkerAction::Start),
            "stop" => Ok(WorkerAction::Stop),
            "run-once" | "run_once" => Ok(WorkerAction::RunOnce),
            "status" => Ok(WorkerAction::Status),
            other => Err(format!("unknown worker action: {}", other)),
        }
    }
}

impl fmt::Display for WorkerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response of a control endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_running: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_jobs: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<String>,
}

impl ControlResponse {
    /// One-line description for the event log.
    pub fn describe(&self, worker: &str, action: WorkerAction) -> String {
        if !self.success {
            let reason = self.error.as_deref().unwrap_or("unknown error");
            return format!("{} {} failed: {}", worker, action, reason);
        }
        if action == WorkerAction::Status {
            let running = match self.is_running {
                Some(true) => "running",
                Some(false) => "stopped",
                None => "unknown",
            };
            let mut line = format!("{} is {}", worker, running);
            if let Some(next_run) = &self.next_run {
                line.push_str(&format!(", next run {}", next_run));
            }
            return line;
        }
        match &self.message {
            Some(message) => format!("{} {}: {}", worker, action, message),
            None => format!("{} {} ok", worker, action),
        }
    }
}

/// Sends control actions to workers.
#[async_trait]
pub trait WorkerControl: Send + Sync {
    async fn send(&self, worker: &str, action: WorkerAction) -> Result<ControlResponse, FetchError>;
}

/// Worker control over HTTP: `POST {base}/api/{worker}/{action}`, and
/// `GET {base}/api/{worker}/status`.
#[derive(Debug, Clone)]
pub struct HttpWorkerControl {
    client: reqwest::Client,
    base_url: String,
}

impl HttpWorkerControl {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn url(&self, worker: &str, action: WorkerAction) -> Result<String, FetchError> {
        let valid = !worker.is_empty()
            && worker
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(FetchError::Rejected(format!("invalid worker name: {:?}", worker)));
        }
        Ok(format!("{}/api/{}/{}", self.base_url, worker, action))
    }
}

#[async_trait]
impl WorkerControl for HttpWorkerControl {
    async fn send(&self, worker: &str, action: WorkerAction) -> Result<ControlResponse, FetchError> {
        let url = self.url(worker, action)?;
        debug!(%url, %action, "Sending worker control");

        let request = match action {
            WorkerAction::Status => self.client.get(&url),
            _ => self.client.post(&url),
        };
        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .json::<ControlResponse>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()));

        // Control endpoints report failures in the body, often with a 4xx/5xx.
        match body {
            Ok(body) => Ok(body),
            Err(_) if !status.is_success() => Err(FetchError::Status {
                status: status.as_u16(),
            }),
            Err(e) => Err(e),
        }
    }
}
