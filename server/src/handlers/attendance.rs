use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::services::attendance::{self, MarkRequest, OverrideRequest, ScanRequest};
use crate::state::AppState;
use crate::utils::auth::Principal;
use crate::utils::error::AppError;
use crate::utils::response::success;

pub async fn scan(
    State(state): State<AppState>,
    principal: Principal,
    Path(event_id): Path<Uuid>,
    Json(request): Json<ScanRequest>,
) -> Result<Response, AppError> {
    let organizer_id = principal.require_organizer()?;
    let receipt = attendance::scan_qr(&state, organizer_id, event_id, &request.qr_data).await?;
    Ok(success(receipt, "Attendance marked!").into_response())
}

pub async fn mark(
    State(state): State<AppState>,
    principal: Principal,
    Json(request): Json<MarkRequest>,
) -> Result<Response, AppError> {
    let organizer_id = principal.require_organizer()?;
    let receipt = attendance::mark_by_ticket(&state, organizer_id, &request.ticket_id).await?;
    Ok(success(receipt, "Attendance marked successfully").into_response())
}

pub async fn manual_override(
    State(state): State<AppState>,
    principal: Principal,
    Path(event_id): Path<Uuid>,
    Json(request): Json<OverrideRequest>,
) -> Result<Response, AppError> {
    let organizer_id = principal.require_organizer()?;
    let registration =
        attendance::manual_override(&state, organizer_id, event_id, request).await?;
    let message = if registration.attended() {
        "Attendance marked via manual override"
    } else {
        "Attendance unmarked via manual override"
    };
    Ok(success(registration, message).into_response())
}
