use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::info;
use uuid::Uuid;

use crate::models::{
    AdmissionStatus, AuditLog, EventView, FormField, ParticipantProfile, Registration,
    RegistrationState, TicketPayload,
};
use crate::services::events::owned_event;
use crate::services::notify::{registration_email, spawn_email};
use crate::state::AppState;
use crate::store::{RegisterOutcome, RegistrationQuery};
use crate::utils::error::AppError;

/// A registration together with the participant who holds it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRegistration {
    #[serde(flatten)]
    pub registration: Registration,
    pub participant: Option<ParticipantProfile>,
}

/// A participant's own registration with the event it belongs to.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MyRegistration {
    #[serde(flatten)]
    pub registration: Registration,
    pub event: Option<EventView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketDetails {
    #[serde(flatten)]
    pub registration: Registration,
    pub event: Option<EventView>,
    pub participant: Option<ParticipantProfile>,
}

pub(crate) async fn participant(
    state: &AppState,
    participant_id: Uuid,
) -> Result<ParticipantProfile, AppError> {
    state
        .store
        .participant_profile(participant_id)
        .await?
        .ok_or_else(|| AppError::Forbidden("Participant profile not found".to_string()))
}

/// Attaches participant profiles, loading each distinct participant once.
pub(crate) async fn with_participants(
    state: &AppState,
    registrations: Vec<Registration>,
) -> Result<Vec<ParticipantRegistration>, AppError> {
    let mut profiles: HashMap<Uuid, Option<ParticipantProfile>> = HashMap::new();
    let mut rows = Vec::with_capacity(registrations.len());
    for registration in registrations {
        let id = registration.participant_id;
        if !profiles.contains_key(&id) {
            profiles.insert(id, state.store.participant_profile(id).await?);
        }
        rows.push(ParticipantRegistration {
            participant: profiles.get(&id).cloned().flatten(),
            registration,
        });
    }
    Ok(rows)
}

pub async fn register(
    state: &AppState,
    event_id: Uuid,
    participant_id: Uuid,
    responses: BTreeMap<String, String>,
) -> Result<Registration, AppError> {
    let event = state
        .store
        .get_event(event_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Event not found".to_string()))?;
    let now = state.clock.now();

    if event.is_merchandise() {
        return Err(AppError::EventNotOpen);
    }
    event.registration_open(now)?;
    FormField::check_responses(&event.custom_form, &responses)?;
    let profile = participant(state, participant_id).await?;
    event.check_eligibility(profile.participant_type)?;

    let issued = TicketPayload::new(&event.name, event.id, &profile.email).issue()?;
    let registration = Registration {
        id: Uuid::new_v4(),
        event_id,
        participant_id,
        state: RegistrationState::Ordinary(AdmissionStatus::Registered),
        attended_at: None,
        audit_log: AuditLog::default(),
        ticket: Some(issued.ticket()),
        custom_responses: responses,
        registered_at: now,
        updated_at: now,
    };

    match state.store.insert_registration(&registration).await? {
        RegisterOutcome::Created => {}
        RegisterOutcome::AlreadyRegistered => return Err(AppError::AlreadyRegistered),
        RegisterOutcome::CapacityReached => return Err(AppError::CapacityReached),
    }
    info!(
        event_id = %event_id,
        participant_id = %participant_id,
        ticket_id = %issued.payload.ticket_id,
        "Participant registered"
    );

    spawn_email(
        state.notifier.clone(),
        registration_email(&profile.email, &event, &issued.payload.ticket_id, issued.png),
    );
    Ok(registration)
}

pub async fn cancel(
    state: &AppState,
    event_id: Uuid,
    participant_id: Uuid,
) -> Result<Registration, AppError> {
    let removed = state
        .store
        .delete_registration(event_id, participant_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Registration not found".to_string()))?;
    info!(event_id = %event_id, participant_id = %participant_id, "Registration cancelled");
    Ok(removed)
}

pub async fn my_registrations(
    state: &AppState,
    participant_id: Uuid,
) -> Result<Vec<MyRegistration>, AppError> {
    let registrations = state
        .store
        .list_registrations(&RegistrationQuery {
            participant_id: Some(participant_id),
            ..RegistrationQuery::default()
        })
        .await?;

    let now = state.clock.now();
    let mut events: HashMap<Uuid, Option<EventView>> = HashMap::new();
    let mut rows = Vec::with_capacity(registrations.len());
    for registration in registrations {
        let id = registration.event_id;
        if !events.contains_key(&id) {
            let event = state.store.get_event(id).await?;
            events.insert(id, event.map(|e| EventView::at(e, now)));
        }
        rows.push(MyRegistration {
            event: events.get(&id).cloned().flatten(),
            registration,
        });
    }
    Ok(rows)
}

pub async fn event_registrations(
    state: &AppState,
    organizer_id: Uuid,
    event_id: Uuid,
) -> Result<Vec<ParticipantRegistration>, AppError> {
    owned_event(state, organizer_id, event_id).await?;
    let registrations = state
        .store
        .list_registrations(&RegistrationQuery {
            event_id: Some(event_id),
            ..RegistrationQuery::default()
        })
        .await?;
    with_participants(state, registrations).await
}

pub async fn ticket(state: &AppState, ticket_id: &str) -> Result<TicketDetails, AppError> {
    let registration = state
        .store
        .find_by_ticket(ticket_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Ticket not found".to_string()))?;
    let event = state
        .store
        .get_event(registration.event_id)
        .await?
        .map(|e| EventView::at(e, state.clock.now()));
    let participant = state
        .store
        .participant_profile(registration.participant_id)
        .await?;
    Ok(TicketDetails {
        registration,
        event,
        participant,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Eligibility, EventStatus, FormFieldType, ParticipantType, RegistrationStatus};
    use crate::services::events::{self, UpdateEventInput};
    use crate::services::fixtures::{merch_input, ordinary_input, Harness};
    use crate::services::notify::testing::{RecordingNotifier, Sent};
    use chrono::Duration;
    use std::sync::Arc;

    #[tokio::test]
    async fn registering_issues_a_ticket_and_sends_it() {
        let h = Harness::new();
        let organizer = h.organizer().await;
        let event = h.published(organizer, ordinary_input(0)).await;
        let participant_id = h.participant(ParticipantType::GroupA).await;

        let registration = register(&h.state, event.id, participant_id, BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(registration.status(), RegistrationStatus::Registered);
        assert_eq!(registration.payment_status(), None);
        let ticket = registration.ticket.clone().unwrap();
        assert!(ticket.qr_code.starts_with("data:image/png;base64,"));

        let found = super::ticket(&h.state, &ticket.ticket_id).await.unwrap();
        assert_eq!(found.registration.id, registration.id);
        assert_eq!(found.event.unwrap().event.id, event.id);

        h.settle().await;
        let sent = h.notifier.sent().await;
        assert!(sent.iter().any(|s| matches!(
            s,
            Sent::Email(m) if m.subject == "Event Registration Successful"
                && m.body_html.contains(&ticket.ticket_id)
                && m.inline_image.is_some()
        )));
    }

    #[tokio::test]
    async fn email_failure_keeps_the_registration() {
        let h = Harness::with_notifier(RecordingNotifier::failing());
        let organizer = h.organizer().await;
        let event = h.published(organizer, ordinary_input(0)).await;
        let participant_id = h.participant(ParticipantType::GroupA).await;

        register(&h.state, event.id, participant_id, BTreeMap::new())
            .await
            .unwrap();
        h.settle().await;

        let mine = my_registrations(&h.state, participant_id).await.unwrap();
        assert_eq!(mine.len(), 1);
    }

    #[tokio::test]
    async fn drafts_and_merchandise_are_not_open() {
        let h = Harness::new();
        let organizer = h.organizer().await;
        let participant_id = h.participant(ParticipantType::GroupA).await;
        let draft = events::create(&h.state, organizer, ordinary_input(0))
            .await
            .unwrap();
        let merch = h.published(organizer, merch_input(vec![("M", "Red", 1)], 1)).await;

        assert!(matches!(
            register(&h.state, draft.event.id, participant_id, BTreeMap::new()).await,
            Err(AppError::EventNotOpen)
        ));
        assert!(matches!(
            register(&h.state, merch.id, participant_id, BTreeMap::new()).await,
            Err(AppError::EventNotOpen)
        ));
    }

    #[tokio::test]
    async fn registration_after_the_deadline_is_refused() {
        let h = Harness::new();
        let organizer = h.organizer().await;
        let event = h.published(organizer, ordinary_input(0)).await;
        let participant_id = h.participant(ParticipantType::GroupA).await;

        // Deadline passed, event not yet started.
        h.clock.set(event.registration_deadline + Duration::minutes(1));
        assert!(h.clock_now() < event.event_start_date);
        assert!(matches!(
            register(&h.state, event.id, participant_id, BTreeMap::new()).await,
            Err(AppError::DeadlinePassed)
        ));
        assert_eq!(
            h.state.store.count_active_registrations(event.id).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn required_form_fields_must_be_answered() {
        let h = Harness::new();
        let organizer = h.organizer().await;
        let mut input = ordinary_input(0);
        input.custom_form = vec![FormField {
            id: "f1".to_string(),
            label: "Team name".to_string(),
            field_type: FormFieldType::Text,
            required: true,
            options: Vec::new(),
        }];
        let event = h.published(organizer, input).await;
        let participant_id = h.participant(ParticipantType::GroupA).await;

        let blank = BTreeMap::from([("Team name".to_string(), "  ".to_string())]);
        assert!(matches!(
            register(&h.state, event.id, participant_id, blank).await,
            Err(AppError::FormValidation(label)) if label == "Team name"
        ));

        let answered = BTreeMap::from([("Team name".to_string(), "Rustaceans".to_string())]);
        let registration = register(&h.state, event.id, participant_id, answered)
            .await
            .unwrap();
        assert_eq!(registration.custom_responses["Team name"], "Rustaceans");
    }

    #[tokio::test]
    async fn eligibility_is_enforced() {
        let h = Harness::new();
        let organizer = h.organizer().await;
        let mut input = ordinary_input(0);
        input.eligibility = Eligibility::GroupA;
        let event = h.published(organizer, input).await;
        let outsider = h.participant(ParticipantType::GroupB).await;

        assert!(matches!(
            register(&h.state, event.id, outsider, BTreeMap::new()).await,
            Err(AppError::EligibilityMismatch(Eligibility::GroupA))
        ));
    }

    #[tokio::test]
    async fn second_registration_is_refused_until_cancelled() {
        let h = Harness::new();
        let organizer = h.organizer().await;
        let event = h.published(organizer, ordinary_input(0)).await;
        let participant_id = h.participant(ParticipantType::GroupA).await;

        register(&h.state, event.id, participant_id, BTreeMap::new())
            .await
            .unwrap();
        assert!(matches!(
            register(&h.state, event.id, participant_id, BTreeMap::new()).await,
            Err(AppError::AlreadyRegistered)
        ));

        cancel(&h.state, event.id, participant_id).await.unwrap();
        assert!(matches!(
            cancel(&h.state, event.id, participant_id).await,
            Err(AppError::NotFound(_))
        ));
        register(&h.state, event.id, participant_id, BTreeMap::new())
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn last_seat_goes_to_exactly_one_participant() {
        let h = Harness::new();
        let organizer = h.organizer().await;
        let event = h.published(organizer, ordinary_input(1)).await;
        let a = h.participant(ParticipantType::GroupA).await;
        let b = h.participant(ParticipantType::GroupB).await;

        let state = Arc::new(h.state.clone());
        let (ra, rb) = tokio::join!(
            tokio::spawn({
                let state = state.clone();
                async move { register(&state, event.id, a, BTreeMap::new()).await }
            }),
            tokio::spawn({
                let state = state.clone();
                async move { register(&state, event.id, b, BTreeMap::new()).await }
            }),
        );
        let results = [ra.unwrap(), rb.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(AppError::CapacityReached))));
        assert_eq!(
            h.state.store.count_active_registrations(event.id).await.unwrap(),
            1
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_duplicates_leave_one_registration() {
        let h = Harness::new();
        let organizer = h.organizer().await;
        let event = h.published(organizer, ordinary_input(0)).await;
        let participant_id = h.participant(ParticipantType::GroupA).await;

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let state = h.state.clone();
            tasks.push(tokio::spawn(async move {
                register(&state, event.id, participant_id, BTreeMap::new()).await
            }));
        }
        let mut created = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => created += 1,
                Err(e) => assert!(matches!(e, AppError::AlreadyRegistered)),
            }
        }

        assert_eq!(created, 1);
        assert_eq!(my_registrations(&h.state, participant_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn my_registrations_carry_the_derived_event_status() {
        let h = Harness::new();
        let organizer = h.organizer().await;
        let event = h.published(organizer, ordinary_input(0)).await;
        let participant_id = h.participant(ParticipantType::GroupA).await;
        register(&h.state, event.id, participant_id, BTreeMap::new())
            .await
            .unwrap();

        h.clock.set(event.event_start_date + Duration::minutes(5));
        let mine = my_registrations(&h.state, participant_id).await.unwrap();
        let view = mine[0].event.as_ref().unwrap();
        assert_eq!(view.status, EventStatus::Ongoing);
        assert_eq!(view.event.status, EventStatus::Published);
    }

    #[tokio::test]
    async fn organizers_list_their_own_event_registrations() {
        let h = Harness::new();
        let organizer = h.organizer().await;
        let other = h.organizer().await;
        let event = h.published(organizer, ordinary_input(0)).await;
        let participant_id = h.participant(ParticipantType::GroupA).await;
        register(&h.state, event.id, participant_id, BTreeMap::new())
            .await
            .unwrap();

        let rows = event_registrations(&h.state, organizer, event.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].participant.as_ref().unwrap().user_id, participant_id);

        assert!(matches!(
            event_registrations(&h.state, other, event.id).await,
            Err(AppError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn raising_the_limit_reopens_capacity() {
        let h = Harness::new();
        let organizer = h.organizer().await;
        let event = h.published(organizer, ordinary_input(1)).await;
        let a = h.participant(ParticipantType::GroupA).await;
        let b = h.participant(ParticipantType::GroupA).await;

        register(&h.state, event.id, a, BTreeMap::new()).await.unwrap();
        assert!(matches!(
            register(&h.state, event.id, b, BTreeMap::new()).await,
            Err(AppError::CapacityReached)
        ));

        events::update(
            &h.state,
            organizer,
            event.id,
            UpdateEventInput {
                registration_limit: Some(2),
                ..UpdateEventInput::default()
            },
        )
        .await
        .unwrap();
        register(&h.state, event.id, b, BTreeMap::new()).await.unwrap();
    }

    impl Harness {
        fn clock_now(&self) -> chrono::DateTime<chrono::Utc> {
            self.state.clock.now()
        }
    }
}
