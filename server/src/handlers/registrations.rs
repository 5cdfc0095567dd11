use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::services::registration;
use crate::state::AppState;
use crate::utils::auth::Principal;
use crate::utils::error::AppError;
use crate::utils::response::{created, empty_success, success};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBody {
    #[serde(default)]
    pub custom_responses: BTreeMap<String, String>,
}

pub async fn register(
    State(state): State<AppState>,
    principal: Principal,
    Path(event_id): Path<Uuid>,
    body: Option<Json<RegisterBody>>,
) -> Result<Response, AppError> {
    let participant_id = principal.require_participant()?;
    let responses = body.map(|Json(b)| b.custom_responses).unwrap_or_default();
    let registration = registration::register(&state, event_id, participant_id, responses).await?;
    Ok(created(registration, "Registered successfully").into_response())
}

pub async fn cancel(
    State(state): State<AppState>,
    principal: Principal,
    Path(event_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let participant_id = principal.require_participant()?;
    registration::cancel(&state, event_id, participant_id).await?;
    Ok(empty_success("Registration cancelled successfully").into_response())
}

pub async fn my_registrations(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Response, AppError> {
    let participant_id = principal.require_participant()?;
    let rows = registration::my_registrations(&state, participant_id).await?;
    Ok(success(rows, "Your registrations").into_response())
}

pub async fn event_registrations(
    State(state): State<AppState>,
    principal: Principal,
    Path(event_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let organizer_id = principal.require_organizer()?;
    let rows = registration::event_registrations(&state, organizer_id, event_id).await?;
    Ok(success(rows, "Event registrations").into_response())
}

pub async fn ticket(
    State(state): State<AppState>,
    _principal: Principal,
    Path(ticket_id): Path<String>,
) -> Result<Response, AppError> {
    let details = registration::ticket(&state, &ticket_id).await?;
    Ok(success(details, "Ticket found").into_response())
}
