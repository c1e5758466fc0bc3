use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use market_sync::export::{self, ExportFormat};
use market_sync::ProjectionSnapshot;
use types::sort::{SortColumn, SortSpec};

/// Current projection in display order, with revision and checksum.
pub async fn get_entries(State(state): State<AppState>) -> Result<Json<ProjectionSnapshot>, AppError> {
    Ok(Json(state.sync.snapshot().await?))
}

/// Select a sort column; selecting the active column flips the direction.
pub async fn sort_by(
    State(state): State<AppState>,
    Path(column): Path<String>,
) -> Result<Json<SortSpec>, AppError> {
    let column: SortColumn = column.parse().map_err(AppError::BadRequest)?;
    let spec = state.sync.sort_by(column).await?;
    Ok(Json(spec))
}

/// Replace the sort spec outright.
pub async fn set_sort(
    State(state): State<AppState>,
    Json(spec): Json<SortSpec>,
) -> Result<Json<SortSpec>, AppError> {
    state.sync.set_sort(spec).await?;
    Ok(Json(spec))
}

pub async fn refresh(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    state.sync.refresh().await?;
    Ok(StatusCode::ACCEPTED)
}

/// Download the projection as CSV or JSON.
pub async fn export_entries(
    State(state): State<AppState>,
    Path(format): Path<String>,
) -> Result<Response, AppError> {
    let format: ExportFormat = format.parse()?;
    let snapshot = state.sync.snapshot().await?;
    let body = export::render(&snapshot.entries, format)?;
    let filename = export::export_filename(format, Utc::now());

    tracing::info!(%format, entries = snapshot.entries.len(), %filename, "Export rendered");
    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    )
        .into_response())
}
