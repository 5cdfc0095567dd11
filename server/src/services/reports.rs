use csv::{QuoteStyle, WriterBuilder};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{
    Event, EventKind, EventStatus, EventView, FormField, PaymentStatus, Registration,
};
use crate::services::events::{organizer_events, owned_event};
use crate::services::registration::{with_participants, ParticipantRegistration};
use crate::state::AppState;
use crate::store::RegistrationQuery;
use crate::utils::error::AppError;

const BASE_COLUMNS: [&str; 7] = [
    "Name",
    "Email",
    "Contact",
    "TicketID",
    "Status",
    "Attended",
    "AttendedAt",
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventAnalytics {
    pub event: EventView,
    pub total_registrations: usize,
    pub total_revenue: Decimal,
    pub participants: Vec<ParticipantRegistration>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub total_events: usize,
    pub total_registrations: usize,
    pub total_revenue: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardEntry {
    pub event_id: Uuid,
    pub event_name: String,
    pub kind: EventKind,
    pub status: EventStatus,
    pub registration_count: usize,
    pub revenue: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub summary: DashboardSummary,
    pub events: Vec<DashboardEntry>,
}

/// Ordinary events earn the fee per live registration; merchandise earns what approved orders paid.
pub fn revenue(event: &Event, registrations: &[Registration]) -> Decimal {
    match event.kind {
        EventKind::Ordinary => {
            let live = registrations.iter().filter(|r| r.is_active()).count();
            event.registration_fee * Decimal::from(live)
        }
        EventKind::Merchandise => registrations
            .iter()
            .filter(|r| r.payment_status() == Some(PaymentStatus::Approved))
            .filter_map(|r| r.order())
            .map(|o| o.purchase.total_amount)
            .sum(),
    }
}

async fn registrations_of(state: &AppState, event_id: Uuid) -> Result<Vec<Registration>, AppError> {
    Ok(state
        .store
        .list_registrations(&RegistrationQuery {
            event_id: Some(event_id),
            ..RegistrationQuery::default()
        })
        .await?)
}

pub async fn analytics(
    state: &AppState,
    organizer_id: Uuid,
    event_id: Uuid,
) -> Result<EventAnalytics, AppError> {
    let event = owned_event(state, organizer_id, event_id).await?;
    let registrations = registrations_of(state, event_id).await?;
    let total_revenue = revenue(&event, &registrations);
    let total_registrations = registrations.iter().filter(|r| r.is_active()).count();
    Ok(EventAnalytics {
        event: EventView::at(event, state.clock.now()),
        total_registrations,
        total_revenue,
        participants: with_participants(state, registrations).await?,
    })
}

pub async fn dashboard(state: &AppState, organizer_id: Uuid) -> Result<Dashboard, AppError> {
    if state.store.organizer_profile(organizer_id).await?.is_none() {
        return Err(AppError::Forbidden("Only organizers allowed".to_string()));
    }

    let mut entries = Vec::new();
    for view in organizer_events(state, organizer_id).await? {
        let registrations = registrations_of(state, view.event.id).await?;
        entries.push(DashboardEntry {
            event_id: view.event.id,
            event_name: view.event.name.clone(),
            kind: view.event.kind,
            status: view.status,
            registration_count: registrations.iter().filter(|r| r.is_active()).count(),
            revenue: revenue(&view.event, &registrations),
        });
    }

    Ok(Dashboard {
        summary: DashboardSummary {
            total_events: entries.len(),
            total_registrations: entries.iter().map(|e| e.registration_count).sum(),
            total_revenue: entries.iter().map(|e| e.revenue).sum(),
        },
        events: entries,
    })
}

/// Registrations as CSV: the fixed columns, then one column per custom-form
/// label. Labels follow the form's field order; answers to labels no longer on
/// the form come after, in the order they were first seen.
pub async fn export_csv(
    state: &AppState,
    organizer_id: Uuid,
    event_id: Uuid,
) -> Result<String, AppError> {
    let event = owned_event(state, organizer_id, event_id).await?;
    let mut registrations = registrations_of(state, event_id).await?;
    registrations.reverse();
    let rows = with_participants(state, registrations).await?;
    render_csv(&event.custom_form, &rows)
}

fn render_csv(form: &[FormField], rows: &[ParticipantRegistration]) -> Result<String, AppError> {
    let mut labels: Vec<&str> = Vec::new();
    for field in form {
        if !labels.contains(&field.label.as_str()) {
            labels.push(&field.label);
        }
    }
    for row in rows {
        for label in row.registration.custom_responses.keys() {
            if !labels.contains(&label.as_str()) {
                labels.push(label);
            }
        }
    }

    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_writer(Vec::new());
    let csv_error = |e: csv::Error| AppError::InternalServerError(format!("csv export: {e}"));

    writer
        .write_record(BASE_COLUMNS.iter().copied().chain(labels.iter().copied()))
        .map_err(csv_error)?;
    for row in rows {
        let registration = &row.registration;
        let (name, email, contact) = match &row.participant {
            Some(p) => (p.full_name(), p.email.as_str(), p.contact_number.as_str()),
            None => (String::new(), "", ""),
        };
        let attended_at = registration
            .attended_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_default();

        let mut record = vec![
            name,
            email.to_string(),
            contact.to_string(),
            registration.ticket_id().unwrap_or_default().to_string(),
            registration.status().to_string(),
            registration.attended().to_string(),
            attended_at,
        ];
        record.extend(labels.iter().map(|label| {
            registration
                .custom_responses
                .get(*label)
                .cloned()
                .unwrap_or_default()
        }));
        writer.write_record(&record).map_err(csv_error)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::InternalServerError(format!("csv export: {e}")))?;
    String::from_utf8(bytes).map_err(|e| AppError::InternalServerError(format!("csv export: {e}")))
}
