use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::services::reports;
use crate::state::AppState;
use crate::utils::auth::Principal;
use crate::utils::error::AppError;
use crate::utils::response::success;

pub async fn export_csv(
    State(state): State<AppState>,
    principal: Principal,
    Path(event_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let organizer_id = principal.require_organizer()?;
    let csv = reports::export_csv(&state, organizer_id, event_id).await?;
    let disposition = format!("attachment; filename=\"participants-{event_id}.csv\"");
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        csv,
    )
        .into_response())
}

pub async fn analytics(
    State(state): State<AppState>,
    principal: Principal,
    Path(event_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let organizer_id = principal.require_organizer()?;
    let stats = reports::analytics(&state, organizer_id, event_id).await?;
    Ok(success(stats, "Event analytics").into_response())
}

pub async fn dashboard(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Response, AppError> {
    let organizer_id = principal.require_organizer()?;
    let board = reports::dashboard(&state, organizer_id).await?;
    Ok(success(board, "Organizer dashboard").into_response())
}
