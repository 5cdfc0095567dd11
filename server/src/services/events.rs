use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::models::{
    Eligibility, Event, EventKind, EventStatus, EventView, FormField, MerchandiseDetails, Variant,
};
use crate::services::notify::{published_announcement, spawn_webhook};
use crate::state::AppState;
use crate::store::{EventGuard, EventQuery, UpdateOutcome};
use crate::utils::error::AppError;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerchandiseInput {
    pub item_name: String,
    pub price: Decimal,
    #[serde(default = "default_purchase_limit")]
    pub purchase_limit_per_participant: i32,
    #[serde(default)]
    pub variants: Vec<Variant>,
}

fn default_purchase_limit() -> i32 {
    1
}

impl MerchandiseInput {
    fn into_details(self) -> MerchandiseDetails {
        MerchandiseDetails::new(
            self.item_name,
            self.price,
            self.purchase_limit_per_participant,
            self.variants,
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub kind: EventKind,
    #[serde(default = "default_eligibility")]
    pub eligibility: Eligibility,
    #[serde(default)]
    pub tags: Vec<String>,
    pub registration_deadline: DateTime<Utc>,
    pub event_start_date: DateTime<Utc>,
    pub event_end_date: DateTime<Utc>,
    #[serde(default)]
    pub registration_limit: i32,
    #[serde(default)]
    pub registration_fee: Decimal,
    pub merchandise: Option<MerchandiseInput>,
    #[serde(default)]
    pub custom_form: Vec<FormField>,
}

fn default_eligibility() -> Eligibility {
    Eligibility::All
}

/// Partial update. Absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEventInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub kind: Option<EventKind>,
    pub eligibility: Option<Eligibility>,
    pub tags: Option<Vec<String>>,
    pub registration_deadline: Option<DateTime<Utc>>,
    pub event_start_date: Option<DateTime<Utc>>,
    pub event_end_date: Option<DateTime<Utc>>,
    pub registration_limit: Option<i32>,
    pub registration_fee: Option<Decimal>,
    pub status: Option<EventStatus>,
    pub merchandise: Option<MerchandiseInput>,
    pub custom_form: Option<Vec<FormField>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFilters {
    #[serde(rename = "type")]
    pub kind: Option<EventKind>,
    pub eligibility: Option<Eligibility>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

pub async fn create(
    state: &AppState,
    organizer_id: Uuid,
    input: CreateEventInput,
) -> Result<EventView, AppError> {
    if state.store.organizer_profile(organizer_id).await?.is_none() {
        return Err(AppError::Forbidden("Only organizers allowed".to_string()));
    }

    let now = state.clock.now();
    let merchandise = input.merchandise.map(MerchandiseInput::into_details);
    // A merchandise event charges its unit price.
    let registration_fee = match (&input.kind, &merchandise) {
        (EventKind::Merchandise, Some(details)) => details.unit_price,
        _ => input.registration_fee,
    };

    let event = Event {
        id: Uuid::new_v4(),
        organizer_id,
        name: input.name,
        description: input.description,
        kind: input.kind,
        eligibility: input.eligibility,
        tags: input.tags,
        registration_deadline: input.registration_deadline,
        event_start_date: input.event_start_date,
        event_end_date: input.event_end_date,
        registration_limit: input.registration_limit,
        registration_fee,
        status: EventStatus::Draft,
        merchandise,
        custom_form: input.custom_form,
        created_at: now,
        updated_at: now,
    };
    event.validate()?;

    state.store.insert_event(&event).await?;
    info!(event_id = %event.id, organizer_id = %organizer_id, kind = %event.kind, "Event created");
    Ok(EventView::at(event, now))
}

/// Loads an event and checks that `organizer_id` owns it.
pub async fn owned_event(
    state: &AppState,
    organizer_id: Uuid,
    event_id: Uuid,
) -> Result<Event, AppError> {
    let event = state
        .store
        .get_event(event_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Event not found".to_string()))?;
    if event.organizer_id != organizer_id {
        return Err(AppError::Forbidden("Access denied".to_string()));
    }
    Ok(event)
}

fn locked_if_changed<T: PartialEq>(
    requested: Option<&T>,
    current: &T,
    field: &'static str,
) -> Result<(), AppError> {
    match requested {
        Some(value) if value != current => Err(AppError::FieldLocked(field)),
        _ => Ok(()),
    }
}

pub async fn update(
    state: &AppState,
    organizer_id: Uuid,
    event_id: Uuid,
    input: UpdateEventInput,
) -> Result<EventView, AppError> {
    if input.registration_limit.is_some_and(|limit| limit < 0) {
        return Err(AppError::ValidationError(
            "Registration limit cannot be negative".to_string(),
        ));
    }

    let current = owned_event(state, organizer_id, event_id).await?;
    let persisted = current.status;
    let mut event = current.clone();

    let target = match input.status {
        Some(target) if target != persisted => Some(persisted.transition_to(target)?),
        _ => None,
    };

    // Only allowed while nobody has registered; the store re-checks that as it writes.
    let form_changed = match input.custom_form {
        Some(form) if form != current.custom_form => {
            event.custom_form = form;
            true
        }
        _ => false,
    };

    if persisted == EventStatus::Draft {
        if let Some(name) = input.name {
            event.name = name;
        }
        if let Some(kind) = input.kind {
            event.kind = kind;
        }
        if let Some(eligibility) = input.eligibility {
            event.eligibility = eligibility;
        }
        if let Some(tags) = input.tags {
            event.tags = tags;
        }
        if let Some(start) = input.event_start_date {
            event.event_start_date = start;
        }
        if let Some(end) = input.event_end_date {
            event.event_end_date = end;
        }
        if let Some(limit) = input.registration_limit {
            event.registration_limit = limit;
        }
        if let Some(fee) = input.registration_fee {
            event.registration_fee = fee;
        }
        if let Some(merchandise) = input.merchandise {
            event.merchandise = Some(merchandise.into_details());
        }
        if event.kind == EventKind::Ordinary {
            event.merchandise = None;
        } else if let Some(details) = &event.merchandise {
            event.registration_fee = details.unit_price;
        }
    } else {
        locked_if_changed(input.name.as_ref(), &current.name, "name")?;
        locked_if_changed(input.kind.as_ref(), &current.kind, "kind")?;
        locked_if_changed(input.eligibility.as_ref(), &current.eligibility, "eligibility")?;
        locked_if_changed(input.tags.as_ref(), &current.tags, "tags")?;
        locked_if_changed(
            input.event_start_date.as_ref(),
            &current.event_start_date,
            "eventStartDate",
        )?;
        locked_if_changed(
            input.event_end_date.as_ref(),
            &current.event_end_date,
            "eventEndDate",
        )?;
        locked_if_changed(
            input.registration_fee.as_ref(),
            &current.registration_fee,
            "registrationFee",
        )?;
        if input.merchandise.is_some() {
            return Err(AppError::FieldLocked("merchandise"));
        }
        if let Some(limit) = input.registration_limit {
            if limit < current.registration_limit {
                return Err(AppError::FieldLocked("registrationLimit"));
            }
            event.registration_limit = limit;
        }
    }

    if let Some(description) = input.description {
        event.description = description;
    }
    if let Some(deadline) = input.registration_deadline {
        event.registration_deadline = deadline;
    }
    if let Some(target) = target {
        event.status = target;
    }

    event.validate()?;
    let now = state.clock.now();
    event.updated_at = now;

    let guard = EventGuard {
        status: persisted,
        no_registrations: form_changed,
    };
    match state.store.update_event(&event, guard).await? {
        UpdateOutcome::Updated => {}
        UpdateOutcome::HasRegistrations => return Err(AppError::FieldLocked("customForm")),
        UpdateOutcome::StatusChanged => return Err(concurrent_change()),
    }
    info!(event_id = %event.id, from = %persisted, to = %event.status, "Event updated");

    if persisted != EventStatus::Published && event.status == EventStatus::Published {
        announce(state, &event).await;
    }
    Ok(EventView::at(event, now))
}

fn concurrent_change() -> AppError {
    AppError::Conflict("Event was modified concurrently, reload and retry".to_string())
}

pub async fn publish(
    state: &AppState,
    organizer_id: Uuid,
    event_id: Uuid,
) -> Result<EventView, AppError> {
    let mut event = owned_event(state, organizer_id, event_id).await?;
    let persisted = event.status;
    event.status = persisted.transition_to(EventStatus::Published)?;
    let now = state.clock.now();
    event.updated_at = now;

    let guard = EventGuard {
        status: persisted,
        no_registrations: false,
    };
    if state.store.update_event(&event, guard).await? != UpdateOutcome::Updated {
        return Err(concurrent_change());
    }
    info!(event_id = %event.id, "Event published");

    announce(state, &event).await;
    Ok(EventView::at(event, now))
}

/// Posts the publication to the organizer's webhook, if they configured one.
async fn announce(state: &AppState, event: &Event) {
    let webhook = match state.store.organizer_profile(event.organizer_id).await {
        Ok(profile) => profile.and_then(|p| p.webhook_url),
        Err(e) => {
            tracing::warn!(event_id = %event.id, error = %e, "Could not load organizer webhook");
            None
        }
    };
    if let Some(url) = webhook.filter(|u| !u.trim().is_empty()) {
        spawn_webhook(state.notifier.clone(), url, published_announcement(event));
    }
}

pub async fn get(state: &AppState, event_id: Uuid) -> Result<EventView, AppError> {
    let event = state
        .store
        .get_event(event_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Event not found".to_string()))?;
    let count = state.store.count_active_registrations(event_id).await?;
    Ok(EventView::at(event, state.clock.now()).with_count(count))
}

/// Published events, newest first, with the derived status applied.
pub async fn list_published(
    state: &AppState,
    filters: EventFilters,
) -> Result<Vec<EventView>, AppError> {
    let query = EventQuery {
        status: Some(EventStatus::Published),
        kind: filters.kind,
        eligibility: filters.eligibility,
        starts_from: filters.start_date,
        starts_until: filters.end_date,
        ..EventQuery::default()
    };
    let now = state.clock.now();
    let events = state.store.list_events(&query).await?;
    Ok(events.into_iter().map(|e| EventView::at(e, now)).collect())
}

/// Every event the organizer owns, drafts included.
pub async fn organizer_events(
    state: &AppState,
    organizer_id: Uuid,
) -> Result<Vec<EventView>, AppError> {
    let query = EventQuery {
        organizer_id: Some(organizer_id),
        ..EventQuery::default()
    };
    let now = state.clock.now();
    let events = state.store.list_events(&query).await?;
    Ok(events.into_iter().map(|e| EventView::at(e, now)).collect())
}
