use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::models::{
    text_enum, AttendanceChange, AuditAction, AuditEntry, Registration, TicketPayload,
};
use crate::services::events::owned_event;
use crate::state::AppState;
use crate::store::AttendanceOutcome;
use crate::utils::error::{AppError, DuplicateScan, ParticipantSummary};

text_enum! {
    pub enum OverrideAction {
        Mark => "MARK",
        Unmark => "UNMARK",
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub qr_data: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkRequest {
    pub ticket_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideRequest {
    pub registration_id: Uuid,
    pub action: String,
    #[serde(default)]
    pub reason: String,
}

/// What the door operator sees after a successful mark.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceReceipt {
    pub attended: bool,
    pub attended_at: Option<DateTime<Utc>>,
    pub participant: ParticipantSummary,
    pub ticket_id: Option<String>,
}

async fn summary(state: &AppState, registration: &Registration) -> Result<ParticipantSummary, AppError> {
    let profile = state
        .store
        .participant_profile(registration.participant_id)
        .await?;
    Ok(match profile {
        Some(profile) => ParticipantSummary {
            name: profile.full_name(),
            email: profile.email,
        },
        None => ParticipantSummary {
            name: "Unknown participant".to_string(),
            email: String::new(),
        },
    })
}

async fn duplicate(state: &AppState, registration: Registration) -> Result<AppError, AppError> {
    let participant = summary(state, &registration).await?;
    Ok(AppError::DuplicateScan(Box::new(DuplicateScan {
        ticket_id: registration.ticket_id().map(str::to_string),
        attended_at: registration.attended_at.unwrap_or(registration.updated_at),
        participant,
    })))
}

/// Marks a ticket holder as present. A repeat is rejected with the original mark.
async fn mark(
    state: &AppState,
    registration: &Registration,
    performed_by: Uuid,
    reason: &str,
) -> Result<AttendanceReceipt, AppError> {
    let now = state.clock.now();
    let entry = AuditEntry {
        action: AuditAction::Mark,
        reason: reason.to_string(),
        performed_by,
        timestamp: now,
    };

    let outcome = state
        .store
        .set_attendance(registration.id, AttendanceChange::Mark(now), &entry)
        .await?
        .ok_or_else(|| AppError::NotFound("Registration not found".to_string()))?;
    let marked = match outcome {
        AttendanceOutcome::Applied(marked) => marked,
        AttendanceOutcome::Unchanged(current) => return Err(duplicate(state, current).await?),
        AttendanceOutcome::Ineligible(current) => {
            return Err(AppError::TicketInvalid(current.status()))
        }
    };
    info!(
        event_id = %marked.event_id,
        registration_id = %marked.id,
        performed_by = %performed_by,
        "Attendance marked"
    );

    Ok(AttendanceReceipt {
        attended: marked.attended(),
        attended_at: marked.attended_at,
        participant: summary(state, &marked).await?,
        ticket_id: marked.ticket_id().map(str::to_string),
    })
}

pub async fn scan_qr(
    state: &AppState,
    organizer_id: Uuid,
    event_id: Uuid,
    qr_data: &str,
) -> Result<AttendanceReceipt, AppError> {
    owned_event(state, organizer_id, event_id).await?;
    let payload = TicketPayload::parse(qr_data)?;
    payload.verify_event(event_id)?;

    let registration = state
        .store
        .find_by_ticket(&payload.ticket_id)
        .await?
        .filter(|r| r.event_id == event_id)
        .ok_or_else(|| AppError::NotFound("Ticket not found for this event".to_string()))?;
    mark(state, &registration, organizer_id, "QR scan").await
}

pub async fn mark_by_ticket(
    state: &AppState,
    organizer_id: Uuid,
    ticket_id: &str,
) -> Result<AttendanceReceipt, AppError> {
    let registration = state
        .store
        .find_by_ticket(ticket_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Invalid Ticket ID".to_string()))?;
    owned_event(state, organizer_id, registration.event_id).await?;
    mark(state, &registration, organizer_id, "QR/Ticket scan").await
}

/// Organizer correction of attendance. Every applied override leaves exactly one OVERRIDE entry.
pub async fn manual_override(
    state: &AppState,
    organizer_id: Uuid,
    event_id: Uuid,
    request: OverrideRequest,
) -> Result<Registration, AppError> {
    let reason = request.reason.trim();
    if reason.is_empty() {
        return Err(AppError::ValidationError(
            "Reason is required for manual override".to_string(),
        ));
    }
    let action: OverrideAction = request
        .action
        .parse()
        .map_err(|_| AppError::ValidationError("Action must be MARK or UNMARK".to_string()))?;

    owned_event(state, organizer_id, event_id).await?;
    let registration = state
        .store
        .get_registration(request.registration_id)
        .await?
        .filter(|r| r.event_id == event_id)
        .ok_or_else(|| AppError::NotFound("Registration not found".to_string()))?;

    let now = state.clock.now();
    let change = match action {
        OverrideAction::Mark => AttendanceChange::Mark(now),
        OverrideAction::Unmark => AttendanceChange::Unmark,
    };
    let entry = AuditEntry {
        action: AuditAction::Override,
        reason: reason.to_string(),
        performed_by: organizer_id,
        timestamp: now,
    };

    let outcome = state
        .store
        .set_attendance(registration.id, change, &entry)
        .await?
        .ok_or_else(|| AppError::NotFound("Registration not found".to_string()))?;
    match outcome {
        AttendanceOutcome::Applied(updated) => {
            info!(
                event_id = %event_id,
                registration_id = %updated.id,
                action = %action,
                reason = %reason,
                performed_by = %organizer_id,
                "Attendance overridden"
            );
            Ok(updated)
        }
        AttendanceOutcome::Unchanged(current) => match action {
            OverrideAction::Mark => Err(duplicate(state, current).await?),
            OverrideAction::Unmark => Err(AppError::ValidationError(
                "Attendance is not marked for this registration".to_string(),
            )),
        },
        AttendanceOutcome::Ineligible(current) => Err(AppError::TicketInvalid(current.status())),
    }
}
