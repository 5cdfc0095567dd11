use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    ApproveOutcome, AttendanceOutcome, EventGuard, EventQuery, PaymentFilter, PurchaseOutcome,
    RegisterOutcome, RegistrationQuery, Store, StoreResult, UpdateOutcome,
};
use crate::models::{
    AttendanceChange, AttendanceCheck, AuditEntry, Event, EventKind, EventStatus, OrderStatus,
    OrganizerProfile, ParticipantProfile, Registration, RegistrationState, Ticket,
};

#[derive(Default)]
struct Tables {
    events: HashMap<Uuid, Event>,
    registrations: HashMap<Uuid, Registration>,
    participants: HashMap<Uuid, ParticipantProfile>,
    organizers: HashMap<Uuid, OrganizerProfile>,
}

impl Tables {
    fn active_for(&self, event_id: Uuid) -> impl Iterator<Item = &Registration> {
        self.registrations
            .values()
            .filter(move |r| r.event_id == event_id && r.is_active())
    }
}

/// Process-local store. Each operation runs inside one critical section, which
/// gives it the same all-or-nothing behaviour as a database transaction.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_participant(&self, profile: ParticipantProfile) {
        let mut tables = self.tables.lock().await;
        tables.participants.insert(profile.user_id, profile);
    }

    pub async fn put_organizer(&self, profile: OrganizerProfile) {
        let mut tables = self.tables.lock().await;
        tables.organizers.insert(profile.user_id, profile);
    }
}

fn matches_event(event: &Event, query: &EventQuery) -> bool {
    query.status.map_or(true, |s| event.status == s)
        && query.organizer_id.map_or(true, |o| event.organizer_id == o)
        && query.kind.map_or(true, |k| event.kind == k)
        && query.eligibility.map_or(true, |e| event.eligibility == e)
        && query.starts_from.map_or(true, |t| event.event_start_date >= t)
        && query.starts_until.map_or(true, |t| event.event_start_date <= t)
}

fn matches_registration(registration: &Registration, query: &RegistrationQuery) -> bool {
    let payment = match query.payment {
        PaymentFilter::Any => true,
        PaymentFilter::Orders => registration.payment_status().is_some(),
        PaymentFilter::Status(status) => registration.payment_status() == Some(status),
    };
    payment
        && query.event_id.map_or(true, |e| registration.event_id == e)
        && query.participant_id.map_or(true, |p| registration.participant_id == p)
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_event(&self, event: &Event) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables.events.insert(event.id, event.clone());
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> StoreResult<Option<Event>> {
        Ok(self.tables.lock().await.events.get(&id).cloned())
    }

    async fn list_events(&self, query: &EventQuery) -> StoreResult<Vec<Event>> {
        let tables = self.tables.lock().await;
        let mut events: Vec<Event> = tables
            .events
            .values()
            .filter(|e| matches_event(e, query))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(events)
    }

    async fn update_event(&self, event: &Event, guard: EventGuard) -> StoreResult<UpdateOutcome> {
        let mut tables = self.tables.lock().await;
        if guard.no_registrations
            && tables
                .registrations
                .values()
                .any(|r| r.event_id == event.id)
        {
            return Ok(UpdateOutcome::HasRegistrations);
        }
        match tables.events.get_mut(&event.id) {
            Some(current) if current.status == guard.status => {
                let stock = current.merchandise.clone();
                *current = event.clone();
                // Stock only moves through approvals once the event has left draft.
                if guard.status != EventStatus::Draft {
                    current.merchandise = stock;
                }
                Ok(UpdateOutcome::Updated)
            }
            _ => Ok(UpdateOutcome::StatusChanged),
        }
    }

    async fn count_active_registrations(&self, event_id: Uuid) -> StoreResult<i64> {
        let tables = self.tables.lock().await;
        Ok(tables.active_for(event_id).count() as i64)
    }

    async fn insert_registration(
        &self,
        registration: &Registration,
    ) -> StoreResult<RegisterOutcome> {
        let mut tables = self.tables.lock().await;
        let event_id = registration.event_id;
        let limit = tables
            .events
            .get(&event_id)
            .map_or(0, |e| e.registration_limit);
        let active: Vec<&Registration> = tables
            .active_for(event_id)
            .filter(|r| r.kind() == EventKind::Ordinary)
            .collect();

        if active
            .iter()
            .any(|r| r.participant_id == registration.participant_id)
        {
            return Ok(RegisterOutcome::AlreadyRegistered);
        }
        if limit > 0 && active.len() as i64 >= i64::from(limit) {
            return Ok(RegisterOutcome::CapacityReached);
        }

        tables
            .registrations
            .insert(registration.id, registration.clone());
        Ok(RegisterOutcome::Created)
    }

    async fn insert_order(&self, order: &Registration) -> StoreResult<PurchaseOutcome> {
        let mut tables = self.tables.lock().await;
        let purchase_limit = tables
            .events
            .get(&order.event_id)
            .and_then(|e| e.merchandise.as_ref())
            .map_or(0, |m| m.purchase_limit_per_participant);
        let already_ordered: i32 = tables
            .active_for(order.event_id)
            .filter(|r| r.participant_id == order.participant_id)
            .filter_map(|r| r.order().map(|o| o.purchase.quantity))
            .sum();
        let requested = order.order().map_or(0, |o| o.purchase.quantity);

        if already_ordered + requested > purchase_limit {
            return Ok(PurchaseOutcome::LimitExceeded { already_ordered });
        }

        tables.registrations.insert(order.id, order.clone());
        Ok(PurchaseOutcome::Created)
    }

    async fn delete_registration(
        &self,
        event_id: Uuid,
        participant_id: Uuid,
    ) -> StoreResult<Option<Registration>> {
        let mut tables = self.tables.lock().await;
        let id = tables
            .active_for(event_id)
            .find(|r| r.participant_id == participant_id && r.kind() == EventKind::Ordinary)
            .map(|r| r.id);
        Ok(id.and_then(|id| tables.registrations.remove(&id)))
    }

    async fn get_registration(&self, id: Uuid) -> StoreResult<Option<Registration>> {
        Ok(self.tables.lock().await.registrations.get(&id).cloned())
    }

    async fn find_by_ticket(&self, ticket_id: &str) -> StoreResult<Option<Registration>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .registrations
            .values()
            .find(|r| r.ticket_id() == Some(ticket_id))
            .cloned())
    }

    async fn list_registrations(&self, query: &RegistrationQuery) -> StoreResult<Vec<Registration>> {
        let tables = self.tables.lock().await;
        let mut registrations: Vec<Registration> = tables
            .registrations
            .values()
            .filter(|r| matches_registration(r, query))
            .cloned()
            .collect();
        registrations.sort_by(|a, b| b.registered_at.cmp(&a.registered_at));
        Ok(registrations)
    }

    async fn approve_order(
        &self,
        order_id: Uuid,
        ticket: &Ticket,
        reviewed_at: DateTime<Utc>,
    ) -> StoreResult<Option<ApproveOutcome>> {
        let mut tables = self.tables.lock().await;
        let Some(registration) = tables.registrations.get(&order_id) else {
            return Ok(None);
        };
        let (event_id, purchase) = match &registration.state {
            RegistrationState::Merchandise(order) if order.status == OrderStatus::PendingApproval => {
                (registration.event_id, order.purchase.clone())
            }
            _ => {
                return Ok(Some(ApproveOutcome::NotPending(
                    registration.payment_status(),
                )))
            }
        };

        let taken = tables
            .events
            .get_mut(&event_id)
            .and_then(|event| event.merchandise.as_mut())
            .map_or(Err(0), |details| {
                details.take_stock(&purchase.size, &purchase.color, purchase.quantity)
            });
        if let Err(available) = taken {
            return Ok(Some(ApproveOutcome::InsufficientStock { available }));
        }

        let Some(registration) = tables.registrations.get_mut(&order_id) else {
            return Ok(None);
        };
        if let RegistrationState::Merchandise(order) = &mut registration.state {
            order.status = OrderStatus::Approved;
            order.reviewed_at = Some(reviewed_at);
        }
        registration.ticket = Some(ticket.clone());
        registration.updated_at = reviewed_at;
        Ok(Some(ApproveOutcome::Approved(registration.clone())))
    }

    async fn reject_order(
        &self,
        order_id: Uuid,
        comment: Option<&str>,
        reviewed_at: DateTime<Utc>,
    ) -> StoreResult<Option<Registration>> {
        let mut tables = self.tables.lock().await;
        let Some(registration) = tables.registrations.get_mut(&order_id) else {
            return Ok(None);
        };
        match &mut registration.state {
            RegistrationState::Merchandise(order) if order.status == OrderStatus::PendingApproval => {
                order.status = OrderStatus::Rejected;
                order.reviewed_at = Some(reviewed_at);
                order.review_comment = comment.map(str::to_string);
            }
            _ => return Ok(None),
        }
        registration.updated_at = reviewed_at;
        Ok(Some(registration.clone()))
    }

    async fn set_attendance(
        &self,
        registration_id: Uuid,
        change: AttendanceChange,
        entry: &AuditEntry,
    ) -> StoreResult<Option<AttendanceOutcome>> {
        let mut tables = self.tables.lock().await;
        let Some(registration) = tables.registrations.get_mut(&registration_id) else {
            return Ok(None);
        };
        let outcome = match registration.check_attendance(change) {
            AttendanceCheck::Applicable => {
                registration.apply_attendance(change, entry.clone());
                AttendanceOutcome::Applied(registration.clone())
            }
            AttendanceCheck::AlreadyInState => AttendanceOutcome::Unchanged(registration.clone()),
            AttendanceCheck::Ineligible(_) => AttendanceOutcome::Ineligible(registration.clone()),
        };
        Ok(Some(outcome))
    }

    async fn participant_profile(&self, user_id: Uuid) -> StoreResult<Option<ParticipantProfile>> {
        Ok(self.tables.lock().await.participants.get(&user_id).cloned())
    }

    async fn organizer_profile(&self, user_id: Uuid) -> StoreResult<Option<OrganizerProfile>> {
        Ok(self.tables.lock().await.organizers.get(&user_id).cloned())
    }
}
