use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use market_sync::control::{ControlResponse, WorkerAction};
use std::collections::BTreeMap;

pub async fn control_worker(
    State(state): State<AppState>,
    Path((worker, action)): Path<(String, String)>,
) -> Result<Json<ControlResponse>, AppError> {
    let action: WorkerAction = action.parse().map_err(AppError::BadRequest)?;
    let response = state.sync.control(worker, action).await?;
    Ok(Json(response))
}

/// Last status reported by each worker.
pub async fn list_workers(State(state): State<AppState>) -> Json<BTreeMap<String, ControlResponse>> {
    Json(state.sync.view().workers)
}
