use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use super::{
    ApproveOutcome, AttendanceOutcome, EventGuard, EventQuery, PaymentFilter, PurchaseOutcome,
    RegisterOutcome, RegistrationQuery, Store, StoreError, StoreResult, UpdateOutcome,
};
use crate::models::{
    AdmissionStatus, AttendanceChange, AttendanceCheck, AuditEntry, AuditLog, Eligibility, Event,
    EventKind, EventStatus, FormField, MerchandiseDetails, MerchandisePurchase, Order,
    OrderStatus, OrganizerProfile, ParticipantProfile, PaymentStatus, Registration,
    RegistrationState, RegistrationStatus, Ticket, Variant,
};

const ACTIVE_REGISTRATIONS_INDEX: &str = "ux_registrations_active_ordinary";

const EVENT_COLUMNS: &str = r#"
  id, organizer_id, name, description, kind, eligibility, tags,
  registration_deadline, event_start_date, event_end_date,
  registration_limit, registration_fee, status,
  item_name, unit_price, purchase_limit, total_stock,
  custom_form, created_at, updated_at
"#;

const REGISTRATION_COLUMNS: &str = r#"
  id, event_id, participant_id, kind, status, payment_status,
  attended_at, audit_log, ticket_id, qr_code,
  size, color, quantity, total_amount,
  payment_proof, payment_reviewed_at, review_comment,
  custom_responses, registered_at, updated_at
"#;

const SQL_INSERT_EVENT: &str = r#"
INSERT INTO events (
  id, organizer_id, name, description, kind, eligibility, tags,
  registration_deadline, event_start_date, event_end_date,
  registration_limit, registration_fee, status,
  item_name, unit_price, purchase_limit, total_stock,
  custom_form, created_at, updated_at
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
"#;

const SQL_UPDATE_EVENT: &str = r#"
UPDATE events SET
  name = $3,
  description = $4,
  kind = $5,
  eligibility = $6,
  tags = $7,
  registration_deadline = $8,
  event_start_date = $9,
  event_end_date = $10,
  registration_limit = $11,
  registration_fee = $12,
  status = $13,
  item_name = $14,
  unit_price = $15,
  purchase_limit = $16,
  total_stock = CASE WHEN $2 = 'DRAFT' THEN $17 ELSE total_stock END,
  custom_form = $18,
  updated_at = $19
WHERE id = $1 AND status = $2
"#;

const SQL_DELETE_VARIANTS: &str = "DELETE FROM event_variants WHERE event_id = $1";

const SQL_INSERT_VARIANT: &str = r#"
INSERT INTO event_variants (event_id, position, size, color, stock)
VALUES ($1, $2, $3, $4, $5)
"#;

const SQL_LIST_VARIANTS: &str = r#"
SELECT event_id, size, color, stock
FROM event_variants
WHERE event_id = ANY($1)
ORDER BY event_id, position
"#;

const SQL_COUNT_ACTIVE: &str = r#"
SELECT COUNT(*) FROM registrations
WHERE event_id = $1 AND status NOT IN ('CANCELLED', 'REJECTED')
"#;

const SQL_LOCK_EVENT: &str = "SELECT id FROM events WHERE id = $1 FOR UPDATE";

const SQL_HAS_ANY_REGISTRATION: &str =
    "SELECT EXISTS (SELECT 1 FROM registrations WHERE event_id = $1)";

const SQL_HAS_ACTIVE_REGISTRATION: &str = r#"
SELECT EXISTS (
  SELECT 1 FROM registrations
  WHERE event_id = $1 AND participant_id = $2
    AND kind = 'ORDINARY' AND status <> 'CANCELLED'
)
"#;

const SQL_CLAIM_SLOT: &str = r#"
UPDATE events
SET registration_count = registration_count + 1
WHERE id = $1 AND (registration_limit = 0 OR registration_count < registration_limit)
"#;

const SQL_RELEASE_SLOT: &str = r#"
UPDATE events
SET registration_count = registration_count - 1
WHERE id = $1 AND registration_count > 0
"#;

const SQL_ORDERED_QUANTITY: &str = r#"
SELECT e.purchase_limit, COALESCE(SUM(r.quantity), 0)
FROM events e
LEFT JOIN registrations r
  ON r.event_id = e.id AND r.participant_id = $2
  AND r.kind = 'MERCHANDISE' AND r.status NOT IN ('CANCELLED', 'REJECTED')
WHERE e.id = $1
GROUP BY e.purchase_limit
"#;

const SQL_INSERT_REGISTRATION: &str = r#"
INSERT INTO registrations (
  id, event_id, participant_id, kind, status, payment_status,
  attended_at, audit_log, ticket_id, qr_code,
  size, color, quantity, total_amount,
  payment_proof, payment_reviewed_at, review_comment,
  custom_responses, registered_at, updated_at
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
"#;

const SQL_DELETE_ACTIVE_REGISTRATION: &str = r#"
DELETE FROM registrations
WHERE event_id = $1 AND participant_id = $2
  AND kind = 'ORDINARY' AND status <> 'CANCELLED'
RETURNING *
"#;

const SQL_CLAIM_PENDING_ORDER: &str = r#"
UPDATE registrations SET
  status = 'APPROVED',
  payment_status = 'APPROVED',
  payment_reviewed_at = $2,
  ticket_id = $3,
  qr_code = $4,
  updated_at = $2
WHERE id = $1 AND payment_status = 'PENDING'
RETURNING *
"#;

const SQL_TAKE_STOCK: &str = r#"
UPDATE event_variants
SET stock = stock - $4
WHERE event_id = $1 AND size = $2 AND color = $3 AND stock >= $4
"#;

const SQL_VARIANT_STOCK: &str = r#"
SELECT stock FROM event_variants WHERE event_id = $1 AND size = $2 AND color = $3
"#;

const SQL_TAKE_TOTAL_STOCK: &str = r#"
UPDATE events SET total_stock = total_stock - $2, updated_at = $3 WHERE id = $1
"#;

const SQL_REJECT_PENDING_ORDER: &str = r#"
UPDATE registrations SET
  status = 'REJECTED',
  payment_status = 'REJECTED',
  payment_reviewed_at = $2,
  review_comment = $3,
  updated_at = $2
WHERE id = $1 AND payment_status = 'PENDING'
RETURNING *
"#;

const SQL_MARK_ATTENDED: &str = r#"
UPDATE registrations SET
  status = 'ATTENDED',
  attended_at = $2,
  audit_log = audit_log || $3,
  updated_at = $4
WHERE id = $1 AND status IN ('REGISTERED', 'APPROVED')
RETURNING *
"#;

const SQL_UNMARK_ATTENDED: &str = r#"
UPDATE registrations SET
  status = CASE WHEN kind = 'MERCHANDISE' THEN 'APPROVED' ELSE 'REGISTERED' END,
  attended_at = NULL,
  audit_log = audit_log || $2,
  updated_at = $3
WHERE id = $1 AND status = 'ATTENDED'
RETURNING *
"#;

const SQL_LOAD_PARTICIPANT: &str = r#"
SELECT user_id, first_name, last_name, email, contact_number, participant_type
FROM participant_profiles
WHERE user_id = $1
"#;

const SQL_LOAD_ORGANIZER: &str = r#"
SELECT user_id, organizer_name, contact_email, webhook_url
FROM organizer_profiles
WHERE user_id = $1
"#;

#[derive(Debug, FromRow)]
struct EventRow {
    id: Uuid,
    organizer_id: Uuid,
    name: String,
    description: String,
    #[sqlx(try_from = "String")]
    kind: EventKind,
    #[sqlx(try_from = "String")]
    eligibility: Eligibility,
    tags: Vec<String>,
    registration_deadline: DateTime<Utc>,
    event_start_date: DateTime<Utc>,
    event_end_date: DateTime<Utc>,
    registration_limit: i32,
    registration_fee: Decimal,
    #[sqlx(try_from = "String")]
    status: EventStatus,
    item_name: Option<String>,
    unit_price: Option<Decimal>,
    purchase_limit: Option<i32>,
    total_stock: Option<i32>,
    custom_form: Json<Vec<FormField>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct VariantRow {
    event_id: Uuid,
    size: String,
    color: String,
    stock: i32,
}

#[derive(Debug, FromRow)]
struct RegistrationRow {
    id: Uuid,
    event_id: Uuid,
    participant_id: Uuid,
    #[sqlx(try_from = "String")]
    kind: EventKind,
    #[sqlx(try_from = "String")]
    status: RegistrationStatus,
    payment_status: Option<String>,
    attended_at: Option<DateTime<Utc>>,
    audit_log: Json<AuditLog>,
    ticket_id: Option<String>,
    qr_code: Option<String>,
    size: Option<String>,
    color: Option<String>,
    quantity: Option<i32>,
    total_amount: Option<Decimal>,
    payment_proof: Option<String>,
    payment_reviewed_at: Option<DateTime<Utc>>,
    review_comment: Option<String>,
    custom_responses: Json<BTreeMap<String, String>>,
    registered_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn assemble_event(row: EventRow, variants: Vec<Variant>) -> StoreResult<Event> {
    let merchandise = match row.kind {
        EventKind::Ordinary => None,
        EventKind::Merchandise => {
            let (Some(item_name), Some(unit_price), Some(purchase_limit), Some(total_stock)) = (
                row.item_name,
                row.unit_price,
                row.purchase_limit,
                row.total_stock,
            ) else {
                return Err(StoreError::Corrupt {
                    entity: "event",
                    id: row.id,
                    reason: "merchandise event without merchandise columns".to_string(),
                });
            };
            Some(MerchandiseDetails {
                item_name,
                unit_price,
                purchase_limit_per_participant: purchase_limit,
                variants,
                total_stock,
            })
        }
    };

    Ok(Event {
        id: row.id,
        organizer_id: row.organizer_id,
        name: row.name,
        description: row.description,
        kind: row.kind,
        eligibility: row.eligibility,
        tags: row.tags,
        registration_deadline: row.registration_deadline,
        event_start_date: row.event_start_date,
        event_end_date: row.event_end_date,
        registration_limit: row.registration_limit,
        registration_fee: row.registration_fee,
        status: row.status,
        merchandise,
        custom_form: row.custom_form.0,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

impl TryFrom<RegistrationRow> for Registration {
    type Error = StoreError;

    fn try_from(row: RegistrationRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: &str| StoreError::Corrupt {
            entity: "registration",
            id: row.id,
            reason: reason.to_string(),
        };

        let state = match row.kind {
            EventKind::Ordinary => {
                let status = match row.status {
                    RegistrationStatus::Registered => AdmissionStatus::Registered,
                    RegistrationStatus::Attended => AdmissionStatus::Attended,
                    RegistrationStatus::Cancelled => AdmissionStatus::Cancelled,
                    _ => return Err(corrupt("order status on an ordinary registration")),
                };
                RegistrationState::Ordinary(status)
            }
            EventKind::Merchandise => {
                let payment: PaymentStatus = row
                    .payment_status
                    .as_deref()
                    .ok_or_else(|| corrupt("order without payment status"))?
                    .parse()
                    .map_err(|e: crate::models::UnknownVariant| corrupt(&e.to_string()))?;
                let status = OrderStatus::from_parts(row.status, payment)
                    .ok_or_else(|| corrupt("status and payment status disagree"))?;
                let (Some(size), Some(color), Some(quantity), Some(total_amount)) = (
                    row.size.clone(),
                    row.color.clone(),
                    row.quantity,
                    row.total_amount,
                ) else {
                    return Err(corrupt("order without purchase details"));
                };
                RegistrationState::Merchandise(Order {
                    status,
                    purchase: MerchandisePurchase {
                        size,
                        color,
                        quantity,
                        total_amount,
                    },
                    payment_proof: row.payment_proof.clone().unwrap_or_default(),
                    reviewed_at: row.payment_reviewed_at,
                    review_comment: row.review_comment.clone(),
                })
            }
        };

        let ticket = match (row.ticket_id, row.qr_code) {
            (Some(ticket_id), Some(qr_code)) => Some(Ticket { ticket_id, qr_code }),
            _ => None,
        };

        Ok(Registration {
            id: row.id,
            event_id: row.event_id,
            participant_id: row.participant_id,
            state,
            attended_at: row.attended_at,
            audit_log: row.audit_log.0,
            ticket,
            custom_responses: row.custom_responses.0,
            registered_at: row.registered_at,
            updated_at: row.updated_at,
        })
    }
}

fn decode(row: Option<RegistrationRow>) -> StoreResult<Option<Registration>> {
    row.map(Registration::try_from).transpose()
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn attach_variants(&self, rows: Vec<EventRow>) -> StoreResult<Vec<Event>> {
        let ids: Vec<Uuid> = rows
            .iter()
            .filter(|r| r.kind == EventKind::Merchandise)
            .map(|r| r.id)
            .collect();
        let mut variants: HashMap<Uuid, Vec<Variant>> = HashMap::new();
        if !ids.is_empty() {
            let rows = sqlx::query_as::<_, VariantRow>(SQL_LIST_VARIANTS)
                .bind(&ids)
                .fetch_all(&self.pool)
                .await?;
            for row in rows {
                variants.entry(row.event_id).or_default().push(Variant {
                    size: row.size,
                    color: row.color,
                    stock: row.stock,
                });
            }
        }

        rows.into_iter()
            .map(|row| {
                let own = variants.remove(&row.id).unwrap_or_default();
                assemble_event(row, own)
            })
            .collect()
    }

    async fn load_registration(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> StoreResult<Option<Registration>> {
        let sql = format!("SELECT {REGISTRATION_COLUMNS} FROM registrations WHERE id = $1");
        let row = sqlx::query_as::<_, RegistrationRow>(&sql)
            .bind(id)
            .fetch_optional(conn)
            .await?;
        decode(row)
    }
}

async fn write_event(conn: &mut PgConnection, sql: &str, event: &Event, expected: Option<EventStatus>)
    -> Result<u64, sqlx::Error>
{
    let merchandise = event.merchandise.as_ref();
    let mut query = sqlx::query(sql).bind(event.id);
    query = match expected {
        Some(expected) => query.bind(expected.as_str()),
        None => query.bind(event.organizer_id),
    };
    let result = query
        .bind(&event.name)
        .bind(&event.description)
        .bind(event.kind.as_str())
        .bind(event.eligibility.as_str())
        .bind(&event.tags)
        .bind(event.registration_deadline)
        .bind(event.event_start_date)
        .bind(event.event_end_date)
        .bind(event.registration_limit)
        .bind(event.registration_fee)
        .bind(event.status.as_str())
        .bind(merchandise.map(|m| m.item_name.as_str()))
        .bind(merchandise.map(|m| m.unit_price))
        .bind(merchandise.map(|m| m.purchase_limit_per_participant))
        .bind(merchandise.map(|m| m.total_stock))
        .bind(Json(&event.custom_form));
    let result = match expected {
        Some(_) => result.bind(event.updated_at),
        None => result.bind(event.created_at).bind(event.updated_at),
    };
    Ok(result.execute(conn).await?.rows_affected())
}

async fn write_variants(conn: &mut PgConnection, event: &Event) -> Result<(), sqlx::Error> {
    sqlx::query(SQL_DELETE_VARIANTS)
        .bind(event.id)
        .execute(&mut *conn)
        .await?;
    let Some(merchandise) = &event.merchandise else {
        return Ok(());
    };
    for (position, variant) in merchandise.variants.iter().enumerate() {
        sqlx::query(SQL_INSERT_VARIANT)
            .bind(event.id)
            .bind(position as i32)
            .bind(&variant.size)
            .bind(&variant.color)
            .bind(variant.stock)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn insert_registration_row(
    conn: &mut PgConnection,
    registration: &Registration,
) -> Result<(), sqlx::Error> {
    let order = registration.order();
    sqlx::query(SQL_INSERT_REGISTRATION)
        .bind(registration.id)
        .bind(registration.event_id)
        .bind(registration.participant_id)
        .bind(registration.kind().as_str())
        .bind(registration.status().as_str())
        .bind(registration.payment_status().map(PaymentStatus::as_str))
        .bind(registration.attended_at)
        .bind(Json(&registration.audit_log))
        .bind(registration.ticket.as_ref().map(|t| t.ticket_id.as_str()))
        .bind(registration.ticket.as_ref().map(|t| t.qr_code.as_str()))
        .bind(order.map(|o| o.purchase.size.as_str()))
        .bind(order.map(|o| o.purchase.color.as_str()))
        .bind(order.map(|o| o.purchase.quantity))
        .bind(order.map(|o| o.purchase.total_amount))
        .bind(order.map(|o| o.payment_proof.as_str()))
        .bind(order.and_then(|o| o.reviewed_at))
        .bind(order.and_then(|o| o.review_comment.as_deref()))
        .bind(Json(&registration.custom_responses))
        .bind(registration.registered_at)
        .bind(registration.updated_at)
        .execute(conn)
        .await?;
    Ok(())
}

fn is_active_registration_conflict(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.is_unique_violation() && db.constraint() == Some(ACTIVE_REGISTRATIONS_INDEX)
        }
        _ => false,
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_event(&self, event: &Event) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        write_event(&mut tx, SQL_INSERT_EVENT, event, None).await?;
        write_variants(&mut tx, event).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> StoreResult<Option<Event>> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1");
        let row = sqlx::query_as::<_, EventRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(self.attach_variants(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_events(&self, query: &EventQuery) -> StoreResult<Vec<Event>> {
        let sql = format!(
            r#"
SELECT {EVENT_COLUMNS} FROM events
WHERE ($1::text IS NULL OR status = $1)
  AND ($2::uuid IS NULL OR organizer_id = $2)
  AND ($3::text IS NULL OR kind = $3)
  AND ($4::text IS NULL OR eligibility = $4)
  AND ($5::timestamptz IS NULL OR event_start_date >= $5)
  AND ($6::timestamptz IS NULL OR event_start_date <= $6)
ORDER BY created_at DESC
"#
        );
        let rows = sqlx::query_as::<_, EventRow>(&sql)
            .bind(query.status.map(EventStatus::as_str))
            .bind(query.organizer_id)
            .bind(query.kind.map(EventKind::as_str))
            .bind(query.eligibility.map(Eligibility::as_str))
            .bind(query.starts_from)
            .bind(query.starts_until)
            .fetch_all(&self.pool)
            .await?;
        self.attach_variants(rows).await
    }

    async fn update_event(&self, event: &Event, guard: EventGuard) -> StoreResult<UpdateOutcome> {
        let mut tx = self.pool.begin().await?;
        // Registrations and orders take the same row lock before inserting.
        sqlx::query(SQL_LOCK_EVENT)
            .bind(event.id)
            .execute(&mut *tx)
            .await?;
        if guard.no_registrations {
            let registered: bool = sqlx::query_scalar(SQL_HAS_ANY_REGISTRATION)
                .bind(event.id)
                .fetch_one(&mut *tx)
                .await?;
            if registered {
                tx.rollback().await?;
                return Ok(UpdateOutcome::HasRegistrations);
            }
        }

        let updated = write_event(&mut tx, SQL_UPDATE_EVENT, event, Some(guard.status)).await?;
        if updated == 0 {
            tx.rollback().await?;
            return Ok(UpdateOutcome::StatusChanged);
        }
        if guard.status == EventStatus::Draft {
            write_variants(&mut tx, event).await?;
        }
        tx.commit().await?;
        Ok(UpdateOutcome::Updated)
    }

    async fn count_active_registrations(&self, event_id: Uuid) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(SQL_COUNT_ACTIVE)
            .bind(event_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn insert_registration(
        &self,
        registration: &Registration,
    ) -> StoreResult<RegisterOutcome> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(SQL_LOCK_EVENT)
            .bind(registration.event_id)
            .execute(&mut *tx)
            .await?;

        let exists: bool = sqlx::query_scalar(SQL_HAS_ACTIVE_REGISTRATION)
            .bind(registration.event_id)
            .bind(registration.participant_id)
            .fetch_one(&mut *tx)
            .await?;
        if exists {
            tx.rollback().await?;
            return Ok(RegisterOutcome::AlreadyRegistered);
        }

        let claimed = sqlx::query(SQL_CLAIM_SLOT)
            .bind(registration.event_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if claimed == 0 {
            tx.rollback().await?;
            return Ok(RegisterOutcome::CapacityReached);
        }

        match insert_registration_row(&mut tx, registration).await {
            Ok(()) => {}
            Err(err) if is_active_registration_conflict(&err) => {
                tx.rollback().await?;
                return Ok(RegisterOutcome::AlreadyRegistered);
            }
            Err(err) => return Err(err.into()),
        }
        tx.commit().await?;
        Ok(RegisterOutcome::Created)
    }

    async fn insert_order(&self, order: &Registration) -> StoreResult<PurchaseOutcome> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(SQL_LOCK_EVENT)
            .bind(order.event_id)
            .execute(&mut *tx)
            .await?;

        let (limit, ordered): (Option<i32>, i64) = sqlx::query_as(SQL_ORDERED_QUANTITY)
            .bind(order.event_id)
            .bind(order.participant_id)
            .fetch_one(&mut *tx)
            .await?;
        let already_ordered = i32::try_from(ordered).unwrap_or(i32::MAX);
        let requested = order.order().map_or(0, |o| o.purchase.quantity);
        if already_ordered.saturating_add(requested) > limit.unwrap_or(0) {
            tx.rollback().await?;
            return Ok(PurchaseOutcome::LimitExceeded { already_ordered });
        }

        insert_registration_row(&mut tx, order).await?;
        tx.commit().await?;
        Ok(PurchaseOutcome::Created)
    }

    async fn delete_registration(
        &self,
        event_id: Uuid,
        participant_id: Uuid,
    ) -> StoreResult<Option<Registration>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, RegistrationRow>(SQL_DELETE_ACTIVE_REGISTRATION)
            .bind(event_id)
            .bind(participant_id)
            .fetch_optional(&mut *tx)
            .await?;
        if row.is_some() {
            sqlx::query(SQL_RELEASE_SLOT)
                .bind(event_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        decode(row)
    }

    async fn get_registration(&self, id: Uuid) -> StoreResult<Option<Registration>> {
        let mut conn = self.pool.acquire().await?;
        Self::load_registration(&mut conn, id).await
    }

    async fn find_by_ticket(&self, ticket_id: &str) -> StoreResult<Option<Registration>> {
        let sql = format!("SELECT {REGISTRATION_COLUMNS} FROM registrations WHERE ticket_id = $1");
        let row = sqlx::query_as::<_, RegistrationRow>(&sql)
            .bind(ticket_id)
            .fetch_optional(&self.pool)
            .await?;
        decode(row)
    }

    async fn list_registrations(&self, query: &RegistrationQuery) -> StoreResult<Vec<Registration>> {
        let (orders_only, payment_status) = match query.payment {
            PaymentFilter::Any => (false, None),
            PaymentFilter::Orders => (true, None),
            PaymentFilter::Status(status) => (true, Some(status.as_str())),
        };
        let sql = format!(
            r#"
SELECT {REGISTRATION_COLUMNS} FROM registrations
WHERE ($1::uuid IS NULL OR event_id = $1)
  AND ($2::uuid IS NULL OR participant_id = $2)
  AND (NOT $3 OR payment_status IS NOT NULL)
  AND ($4::text IS NULL OR payment_status = $4)
ORDER BY registered_at DESC
"#
        );
        let rows = sqlx::query_as::<_, RegistrationRow>(&sql)
            .bind(query.event_id)
            .bind(query.participant_id)
            .bind(orders_only)
            .bind(payment_status)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Registration::try_from).collect()
    }

    async fn approve_order(
        &self,
        order_id: Uuid,
        ticket: &Ticket,
        reviewed_at: DateTime<Utc>,
    ) -> StoreResult<Option<ApproveOutcome>> {
        let mut tx = self.pool.begin().await?;
        let claimed = sqlx::query_as::<_, RegistrationRow>(SQL_CLAIM_PENDING_ORDER)
            .bind(order_id)
            .bind(reviewed_at)
            .bind(&ticket.ticket_id)
            .bind(&ticket.qr_code)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(approved) = decode(claimed)? else {
            let current = Self::load_registration(&mut tx, order_id).await?;
            tx.rollback().await?;
            return Ok(current.map(|r| ApproveOutcome::NotPending(r.payment_status())));
        };
        let Some(order) = approved.order() else {
            tx.rollback().await?;
            return Ok(Some(ApproveOutcome::NotPending(None)));
        };
        let purchase = &order.purchase;

        let taken = sqlx::query(SQL_TAKE_STOCK)
            .bind(approved.event_id)
            .bind(&purchase.size)
            .bind(&purchase.color)
            .bind(purchase.quantity)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if taken == 0 {
            let available: Option<i32> = sqlx::query_scalar(SQL_VARIANT_STOCK)
                .bind(approved.event_id)
                .bind(&purchase.size)
                .bind(&purchase.color)
                .fetch_optional(&mut *tx)
                .await?;
            tx.rollback().await?;
            return Ok(Some(ApproveOutcome::InsufficientStock {
                available: available.unwrap_or(0),
            }));
        }

        sqlx::query(SQL_TAKE_TOTAL_STOCK)
            .bind(approved.event_id)
            .bind(purchase.quantity)
            .bind(reviewed_at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Some(ApproveOutcome::Approved(approved)))
    }

    async fn reject_order(
        &self,
        order_id: Uuid,
        comment: Option<&str>,
        reviewed_at: DateTime<Utc>,
    ) -> StoreResult<Option<Registration>> {
        let row = sqlx::query_as::<_, RegistrationRow>(SQL_REJECT_PENDING_ORDER)
            .bind(order_id)
            .bind(reviewed_at)
            .bind(comment)
            .fetch_optional(&self.pool)
            .await?;
        decode(row)
    }

    async fn set_attendance(
        &self,
        registration_id: Uuid,
        change: AttendanceChange,
        entry: &AuditEntry,
    ) -> StoreResult<Option<AttendanceOutcome>> {
        let appended = Json(vec![entry]);
        let mut conn = self.pool.acquire().await?;
        let row = match change {
            AttendanceChange::Mark(at) => {
                sqlx::query_as::<_, RegistrationRow>(SQL_MARK_ATTENDED)
                    .bind(registration_id)
                    .bind(at)
                    .bind(&appended)
                    .bind(entry.timestamp)
                    .fetch_optional(&mut *conn)
                    .await?
            }
            AttendanceChange::Unmark => {
                sqlx::query_as::<_, RegistrationRow>(SQL_UNMARK_ATTENDED)
                    .bind(registration_id)
                    .bind(&appended)
                    .bind(entry.timestamp)
                    .fetch_optional(&mut *conn)
                    .await?
            }
        };
        if let Some(applied) = decode(row)? {
            return Ok(Some(AttendanceOutcome::Applied(applied)));
        }

        // Lost the conditional update: report what is stored now.
        let current = Self::load_registration(&mut conn, registration_id).await?;
        Ok(current.map(|r| match r.check_attendance(change) {
            AttendanceCheck::Ineligible(_) => AttendanceOutcome::Ineligible(r),
            AttendanceCheck::Applicable | AttendanceCheck::AlreadyInState => {
                AttendanceOutcome::Unchanged(r)
            }
        }))
    }

    async fn participant_profile(&self, user_id: Uuid) -> StoreResult<Option<ParticipantProfile>> {
        let profile = sqlx::query_as::<_, ParticipantProfile>(SQL_LOAD_PARTICIPANT)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(profile)
    }

    async fn organizer_profile(&self, user_id: Uuid) -> StoreResult<Option<OrganizerProfile>> {
        let profile = sqlx::query_as::<_, OrganizerProfile>(SQL_LOAD_ORGANIZER)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(profile)
    }
}
