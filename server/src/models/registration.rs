use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::text_enum;
use crate::models::EventKind;

text_enum! {
    pub enum RegistrationStatus {
        Registered => "REGISTERED",
        Attended => "ATTENDED",
        Cancelled => "CANCELLED",
        PendingApproval => "PENDING_APPROVAL",
        Approved => "APPROVED",
        Rejected => "REJECTED",
    }
}

text_enum! {
    pub enum PaymentStatus {
        Pending => "PENDING",
        Approved => "APPROVED",
        Rejected => "REJECTED",
    }
}

text_enum! {
    pub enum AuditAction {
        Mark => "MARK",
        Unmark => "UNMARK",
        Override => "OVERRIDE",
    }
}

text_enum! {
    /// Lifecycle of a registration to an ordinary event.
    pub enum AdmissionStatus {
        Registered => "REGISTERED",
        Attended => "ATTENDED",
        Cancelled => "CANCELLED",
    }
}

text_enum! {
    /// Lifecycle of a merchandise order. The payment status is derived from it.
    pub enum OrderStatus {
        PendingApproval => "PENDING_APPROVAL",
        Approved => "APPROVED",
        Attended => "ATTENDED",
        Rejected => "REJECTED",
    }
}

impl AdmissionStatus {
    pub const fn status(self) -> RegistrationStatus {
        match self {
            AdmissionStatus::Registered => RegistrationStatus::Registered,
            AdmissionStatus::Attended => RegistrationStatus::Attended,
            AdmissionStatus::Cancelled => RegistrationStatus::Cancelled,
        }
    }
}

impl OrderStatus {
    pub const fn status(self) -> RegistrationStatus {
        match self {
            OrderStatus::PendingApproval => RegistrationStatus::PendingApproval,
            OrderStatus::Approved => RegistrationStatus::Approved,
            OrderStatus::Attended => RegistrationStatus::Attended,
            OrderStatus::Rejected => RegistrationStatus::Rejected,
        }
    }

    pub const fn payment_status(self) -> PaymentStatus {
        match self {
            OrderStatus::PendingApproval => PaymentStatus::Pending,
            OrderStatus::Approved | OrderStatus::Attended => PaymentStatus::Approved,
            OrderStatus::Rejected => PaymentStatus::Rejected,
        }
    }

    /// Rebuilds an order status from its two persisted columns, refusing pairs that disagree.
    pub fn from_parts(status: RegistrationStatus, payment: PaymentStatus) -> Option<Self> {
        let order = match status {
            RegistrationStatus::PendingApproval => OrderStatus::PendingApproval,
            RegistrationStatus::Approved => OrderStatus::Approved,
            RegistrationStatus::Attended => OrderStatus::Attended,
            RegistrationStatus::Rejected => OrderStatus::Rejected,
            RegistrationStatus::Registered | RegistrationStatus::Cancelled => return None,
        };
        (order.payment_status() == payment).then_some(order)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerchandisePurchase {
    pub size: String,
    pub color: String,
    pub quantity: i32,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub status: OrderStatus,
    pub purchase: MerchandisePurchase,
    pub payment_proof: String,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationState {
    Ordinary(AdmissionStatus),
    Merchandise(Order),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub action: AuditAction,
    pub reason: String,
    pub performed_by: Uuid,
    pub timestamp: DateTime<Utc>,
}

/// Attendance history. Entries can be appended, never edited or removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditLog(Vec<AuditEntry>);

impl AuditLog {
    pub fn entries(&self) -> &[AuditEntry] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn append(&mut self, entry: AuditEntry) {
        self.0.push(entry);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub ticket_id: String,
    pub qr_code: String,
}

/// Direction of an attendance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceChange {
    Mark(DateTime<Utc>),
    Unmark,
}

/// Whether an attendance change can apply to a registration as it stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceCheck {
    Applicable,
    AlreadyInState,
    Ineligible(RegistrationStatus),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub id: Uuid,
    pub event_id: Uuid,
    pub participant_id: Uuid,
    pub state: RegistrationState,
    pub attended_at: Option<DateTime<Utc>>,
    pub audit_log: AuditLog,
    pub ticket: Option<Ticket>,
    pub custom_responses: BTreeMap<String, String>,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Registration {
    pub fn kind(&self) -> EventKind {
        match self.state {
            RegistrationState::Ordinary(_) => EventKind::Ordinary,
            RegistrationState::Merchandise(_) => EventKind::Merchandise,
        }
    }

    pub fn status(&self) -> RegistrationStatus {
        match &self.state {
            RegistrationState::Ordinary(status) => status.status(),
            RegistrationState::Merchandise(order) => order.status.status(),
        }
    }

    pub fn payment_status(&self) -> Option<PaymentStatus> {
        self.order().map(|order| order.status.payment_status())
    }

    pub fn order(&self) -> Option<&Order> {
        match &self.state {
            RegistrationState::Merchandise(order) => Some(order),
            RegistrationState::Ordinary(_) => None,
        }
    }

    pub fn attended(&self) -> bool {
        self.status() == RegistrationStatus::Attended
    }

    pub fn ticket_id(&self) -> Option<&str> {
        self.ticket.as_ref().map(|t| t.ticket_id.as_str())
    }

    /// Counts towards capacity and purchase limits.
    pub fn is_active(&self) -> bool {
        !matches!(
            self.status(),
            RegistrationStatus::Cancelled | RegistrationStatus::Rejected
        )
    }

    pub fn check_attendance(&self, change: AttendanceChange) -> AttendanceCheck {
        let status = self.status();
        match status {
            RegistrationStatus::Registered | RegistrationStatus::Approved => match change {
                AttendanceChange::Mark(_) => AttendanceCheck::Applicable,
                AttendanceChange::Unmark => AttendanceCheck::AlreadyInState,
            },
            RegistrationStatus::Attended => match change {
                AttendanceChange::Mark(_) => AttendanceCheck::AlreadyInState,
                AttendanceChange::Unmark => AttendanceCheck::Applicable,
            },
            RegistrationStatus::Cancelled
            | RegistrationStatus::Rejected
            | RegistrationStatus::PendingApproval => AttendanceCheck::Ineligible(status),
        }
    }

    /// Applies an attendance change and its audit entry. Callers check applicability first.
    pub(crate) fn apply_attendance(&mut self, change: AttendanceChange, entry: AuditEntry) {
        match (&mut self.state, change) {
            (RegistrationState::Ordinary(status), AttendanceChange::Mark(_)) => {
                *status = AdmissionStatus::Attended;
            }
            (RegistrationState::Ordinary(status), AttendanceChange::Unmark) => {
                *status = AdmissionStatus::Registered;
            }
            (RegistrationState::Merchandise(order), AttendanceChange::Mark(_)) => {
                order.status = OrderStatus::Attended;
            }
            (RegistrationState::Merchandise(order), AttendanceChange::Unmark) => {
                order.status = OrderStatus::Approved;
            }
        }
        self.attended_at = match change {
            AttendanceChange::Mark(at) => Some(at),
            AttendanceChange::Unmark => None,
        };
        self.updated_at = entry.timestamp;
        self.audit_log.append(entry);
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationView<'a> {
    id: Uuid,
    event_id: Uuid,
    participant_id: Uuid,
    kind: EventKind,
    status: RegistrationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    payment_status: Option<PaymentStatus>,
    attended: bool,
    attended_at: Option<DateTime<Utc>>,
    attendance_audit_log: &'a AuditLog,
    ticket_id: Option<&'a str>,
    qr_code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    merchandise_purchase: Option<&'a MerchandisePurchase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payment_proof: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payment_reviewed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    review_comment: Option<&'a str>,
    custom_responses: &'a BTreeMap<String, String>,
    registered_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Serialize for Registration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let order = self.order();
        RegistrationView {
            id: self.id,
            event_id: self.event_id,
            participant_id: self.participant_id,
            kind: self.kind(),
            status: self.status(),
            payment_status: self.payment_status(),
            attended: self.attended(),
            attended_at: self.attended_at,
            attendance_audit_log: &self.audit_log,
            ticket_id: self.ticket_id(),
            qr_code: self.ticket.as_ref().map(|t| t.qr_code.as_str()),
            merchandise_purchase: order.map(|o| &o.purchase),
            payment_proof: order.map(|o| o.payment_proof.as_str()),
            payment_reviewed_at: order.and_then(|o| o.reviewed_at),
            review_comment: order.and_then(|o| o.review_comment.as_deref()),
            custom_responses: &self.custom_responses,
            registered_at: self.registered_at,
            updated_at: self.updated_at,
        }
        .serialize(serializer)
    }
}
