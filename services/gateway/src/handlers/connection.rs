use crate::error::AppError;
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::collections::BTreeMap;
use types::connection::ConnectionState;
use types::sort::SortSpec;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub connection: ConnectionState,
    pub retry_count: u32,
    pub pulls_active: bool,
    pub revision: u64,
    pub sort: SortSpec,
    pub entries: usize,
    pub logs: usize,
    pub metrics: BTreeMap<String, u64>,
    pub version: &'static str,
}

pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let view = state.sync.view();
    Json(StatusResponse {
        connection: view.connection,
        retry_count: view.retry_count,
        pulls_active: view.pulls_active,
        revision: view.revision,
        sort: view.sort,
        entries: view.projection.len(),
        logs: view.logs.len(),
        metrics: state.sync.metrics().export(),
        version: market_sync::SERVICE_VERSION,
    })
}

/// Start pulling and open the push channel (also retries after exhaustion).
pub async fn connect(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    state.sync.connect().await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn teardown(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    state.sync.teardown().await?;
    Ok(StatusCode::ACCEPTED)
}
