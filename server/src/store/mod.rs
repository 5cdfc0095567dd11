//! Persistence boundary for events, registrations and profile lookups.
//!
//! Every check-then-act rule of the engine (duplicate registration, capacity,
//! cumulative purchase limits, stock decrement, attendance marking) is a single
//! call on [`Store`], so implementations can make it atomic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    AttendanceChange, AuditEntry, Eligibility, Event, EventKind, EventStatus, OrganizerProfile,
    ParticipantProfile, PaymentStatus, Registration, Ticket,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("corrupt {entity} row {id}: {reason}")]
    Corrupt {
        entity: &'static str,
        id: Uuid,
        reason: String,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub status: Option<EventStatus>,
    pub organizer_id: Option<Uuid>,
    pub kind: Option<EventKind>,
    pub eligibility: Option<Eligibility>,
    pub starts_from: Option<DateTime<Utc>>,
    pub starts_until: Option<DateTime<Utc>>,
}

/// Which registrations a listing returns, by payment status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PaymentFilter {
    #[default]
    Any,
    /// Only merchandise orders.
    Orders,
    Status(PaymentStatus),
}

#[derive(Debug, Clone, Default)]
pub struct RegistrationQuery {
    pub event_id: Option<Uuid>,
    pub participant_id: Option<Uuid>,
    pub payment: PaymentFilter,
}

/// Conditions an event update commits under, checked in the same atomic step as the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventGuard {
    /// The persisted status the update was computed from.
    pub status: EventStatus,
    /// Set when the update replaces the custom form.
    pub no_registrations: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    StatusChanged,
    HasRegistrations,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Created,
    AlreadyRegistered,
    CapacityReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseOutcome {
    Created,
    LimitExceeded { already_ordered: i32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApproveOutcome {
    Approved(Registration),
    NotPending(Option<PaymentStatus>),
    InsufficientStock { available: i32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttendanceOutcome {
    Applied(Registration),
    /// Already attended for a mark, not attended for an unmark. Nothing was written.
    Unchanged(Registration),
    Ineligible(Registration),
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_event(&self, event: &Event) -> StoreResult<()>;

    async fn get_event(&self, id: Uuid) -> StoreResult<Option<Event>>;

    async fn list_events(&self, query: &EventQuery) -> StoreResult<Vec<Event>>;

    /// Replaces the event only if every condition of `guard` still holds.
    async fn update_event(&self, event: &Event, guard: EventGuard) -> StoreResult<UpdateOutcome>;

    /// Non-cancelled, non-rejected registrations of any kind.
    async fn count_active_registrations(&self, event_id: Uuid) -> StoreResult<i64>;

    /// Inserts an ordinary registration unless the participant already holds an
    /// active one or the event's stored registration limit is reached, as one
    /// atomic step.
    async fn insert_registration(&self, registration: &Registration)
        -> StoreResult<RegisterOutcome>;

    /// Inserts a merchandise order unless the participant's active ordered
    /// quantity plus this one would exceed the event's stored purchase limit,
    /// as one atomic step.
    async fn insert_order(&self, order: &Registration) -> StoreResult<PurchaseOutcome>;

    /// Hard-deletes the participant's active ordinary registration for the event.
    async fn delete_registration(
        &self,
        event_id: Uuid,
        participant_id: Uuid,
    ) -> StoreResult<Option<Registration>>;

    async fn get_registration(&self, id: Uuid) -> StoreResult<Option<Registration>>;

    async fn find_by_ticket(&self, ticket_id: &str) -> StoreResult<Option<Registration>>;

    /// Newest first.
    async fn list_registrations(&self, query: &RegistrationQuery) -> StoreResult<Vec<Registration>>;

    /// Claims a pending order and takes its quantity from the variant stock in
    /// one atomic step. Nothing changes unless both succeed.
    async fn approve_order(
        &self,
        order_id: Uuid,
        ticket: &Ticket,
        reviewed_at: DateTime<Utc>,
    ) -> StoreResult<Option<ApproveOutcome>>;

    /// Moves a pending order to rejected. `None` when the order is no longer pending.
    async fn reject_order(
        &self,
        order_id: Uuid,
        comment: Option<&str>,
        reviewed_at: DateTime<Utc>,
    ) -> StoreResult<Option<Registration>>;

    /// Conditionally applies an attendance change together with its audit entry.
    async fn set_attendance(
        &self,
        registration_id: Uuid,
        change: AttendanceChange,
        entry: &AuditEntry,
    ) -> StoreResult<Option<AttendanceOutcome>>;

    async fn participant_profile(&self, user_id: Uuid) -> StoreResult<Option<ParticipantProfile>>;

    async fn organizer_profile(&self, user_id: Uuid) -> StoreResult<Option<OrganizerProfile>>;
}
