use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::services::events::{self, CreateEventInput, EventFilters, UpdateEventInput};
use crate::state::AppState;
use crate::utils::auth::Principal;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

pub async fn create_event(
    State(state): State<AppState>,
    principal: Principal,
    Json(input): Json<CreateEventInput>,
) -> Result<Response, AppError> {
    let organizer_id = principal.require_organizer()?;
    let view = events::create(&state, organizer_id, input).await?;
    Ok(created(view, "Event created as draft").into_response())
}

pub async fn publish_event(
    State(state): State<AppState>,
    principal: Principal,
    Path(event_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let organizer_id = principal.require_organizer()?;
    let view = events::publish(&state, organizer_id, event_id).await?;
    Ok(success(view, "Event published successfully").into_response())
}

pub async fn update_event(
    State(state): State<AppState>,
    principal: Principal,
    Path(event_id): Path<Uuid>,
    Json(input): Json<UpdateEventInput>,
) -> Result<Response, AppError> {
    let organizer_id = principal.require_organizer()?;
    let view = events::update(&state, organizer_id, event_id, input).await?;
    Ok(success(view, "Event updated").into_response())
}

pub async fn list_published(
    State(state): State<AppState>,
    _principal: Principal,
    Query(filters): Query<EventFilters>,
) -> Result<Response, AppError> {
    let views = events::list_published(&state, filters).await?;
    Ok(success(views, "Published events").into_response())
}

pub async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let view = events::get(&state, event_id).await?;
    Ok(success(view, "Event found").into_response())
}

pub async fn organizer_events(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Response, AppError> {
    let organizer_id = principal.require_organizer()?;
    let views = events::organizer_events(&state, organizer_id).await?;
    Ok(success(views, "Organizer events").into_response())
}
