use crate::error::AppError;
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use types::log::LogRecord;

/// Event log, oldest first.
pub async fn get_logs(State(state): State<AppState>) -> Json<Vec<LogRecord>> {
    Json(state.sync.view().logs)
}

pub async fn clear_logs(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    state.sync.clear_logs().await?;
    Ok(StatusCode::NO_CONTENT)
}
