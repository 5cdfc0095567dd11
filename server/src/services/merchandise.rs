use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{
    AuditLog, Event, MerchandisePurchase, Order, OrderStatus, PaymentStatus, Registration,
    RegistrationState, TicketPayload,
};
use crate::services::events::owned_event;
use crate::services::notify::{approval_email, spawn_email};
use crate::services::proofs::proof_extension;
use crate::services::registration::{participant, with_participants, ParticipantRegistration};
use crate::state::AppState;
use crate::store::{ApproveOutcome, PaymentFilter, PurchaseOutcome, RegistrationQuery};
use crate::utils::error::AppError;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    pub size: String,
    pub color: String,
    pub quantity: i32,
}

/// The uploaded payment-proof image.
#[derive(Debug, Clone)]
pub struct PaymentProof {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RejectRequest {
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderFilter {
    pub status: Option<PaymentStatus>,
}

pub async fn request_purchase(
    state: &AppState,
    event_id: Uuid,
    participant_id: Uuid,
    request: PurchaseRequest,
    proof: PaymentProof,
) -> Result<Registration, AppError> {
    let event = state
        .store
        .get_event(event_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Event not found".to_string()))?;
    let now = state.clock.now();

    let Some(details) = event.merchandise.as_ref().filter(|_| event.is_merchandise()) else {
        return Err(AppError::EventNotOpen);
    };
    event.registration_open(now)?;
    if request.quantity < 1 {
        return Err(AppError::ValidationError(
            "Quantity must be at least 1".to_string(),
        ));
    }
    let profile = participant(state, participant_id).await?;
    event.check_eligibility(profile.participant_type)?;
    if details.variant(&request.size, &request.color).is_none() {
        return Err(AppError::ValidationError(
            "Selected variant not available".to_string(),
        ));
    }
    let limit = details.purchase_limit_per_participant;
    let already_ordered = ordered_quantity(state, event_id, participant_id).await?;
    if already_ordered.saturating_add(request.quantity) > limit {
        return Err(AppError::PurchaseLimitExceeded { limit });
    }
    proof_extension(&proof.filename, proof.bytes.len())?;

    let payment_proof = state.proofs.save(&proof.filename, &proof.bytes).await?;
    let order = Registration {
        id: Uuid::new_v4(),
        event_id,
        participant_id,
        state: RegistrationState::Merchandise(Order {
            status: OrderStatus::PendingApproval,
            purchase: MerchandisePurchase {
                size: request.size,
                color: request.color,
                quantity: request.quantity,
                total_amount: details.unit_price * Decimal::from(request.quantity),
            },
            payment_proof,
            reviewed_at: None,
            review_comment: None,
        }),
        attended_at: None,
        audit_log: AuditLog::default(),
        ticket: None,
        custom_responses: BTreeMap::new(),
        registered_at: now,
        updated_at: now,
    };

    let rejection = match state.store.insert_order(&order).await {
        Ok(PurchaseOutcome::Created) => None,
        Ok(PurchaseOutcome::LimitExceeded { already_ordered }) => {
            warn!(
                event_id = %event_id,
                participant_id = %participant_id,
                already_ordered,
                "Purchase over the per-participant limit"
            );
            Some(AppError::PurchaseLimitExceeded { limit })
        }
        Err(e) => Some(e.into()),
    };
    if let Some(err) = rejection {
        discard_proof(state, &order).await;
        return Err(err);
    }
    info!(
        event_id = %event_id,
        order_id = %order.id,
        quantity = request.quantity,
        "Merchandise order placed, pending approval"
    );
    Ok(order)
}

/// Quantity the participant already holds on live orders for the event.
async fn ordered_quantity(
    state: &AppState,
    event_id: Uuid,
    participant_id: Uuid,
) -> Result<i32, AppError> {
    let orders = state
        .store
        .list_registrations(&RegistrationQuery {
            event_id: Some(event_id),
            participant_id: Some(participant_id),
            payment: PaymentFilter::Orders,
        })
        .await?;
    Ok(orders
        .iter()
        .filter(|r| r.is_active())
        .filter_map(|r| r.order())
        .fold(0i32, |sum, o| sum.saturating_add(o.purchase.quantity)))
}

/// Removes the proof of an order the store refused.
async fn discard_proof(state: &AppState, order: &Registration) {
    let Some(reference) = order.order().map(|o| o.payment_proof.as_str()) else {
        return;
    };
    if let Err(e) = state.proofs.discard(reference).await {
        warn!(order_id = %order.id, error = %e, "Could not discard payment proof");
    }
}

/// Loads an order of an event the organizer owns.
async fn owned_order(
    state: &AppState,
    organizer_id: Uuid,
    event_id: Uuid,
    order_id: Uuid,
) -> Result<(Event, Registration), AppError> {
    let event = owned_event(state, organizer_id, event_id).await?;
    let order = state
        .store
        .get_registration(order_id)
        .await?
        .filter(|r| r.event_id == event_id && r.order().is_some())
        .ok_or_else(|| AppError::NotFound("Order not found".to_string()))?;
    Ok((event, order))
}

pub async fn approve(
    state: &AppState,
    organizer_id: Uuid,
    event_id: Uuid,
    order_id: Uuid,
) -> Result<Registration, AppError> {
    let (event, order) = owned_order(state, organizer_id, event_id, order_id).await?;
    if order.payment_status() != Some(PaymentStatus::Pending) {
        return Err(AppError::NotPending(order.payment_status()));
    }
    let requested = order.order().map_or(0, |o| o.purchase.quantity);

    let profile = state.store.participant_profile(order.participant_id).await?;
    let holder = profile
        .as_ref()
        .map_or_else(|| order.participant_id.to_string(), |p| p.email.clone());
    let issued = TicketPayload::new(&event.name, event.id, &holder).issue()?;

    let now = state.clock.now();
    let approved = match state
        .store
        .approve_order(order_id, &issued.ticket(), now)
        .await?
    {
        Some(ApproveOutcome::Approved(approved)) => approved,
        Some(ApproveOutcome::NotPending(status)) => return Err(AppError::NotPending(status)),
        Some(ApproveOutcome::InsufficientStock { available }) => {
            return Err(AppError::InsufficientStock {
                available,
                requested,
            })
        }
        None => return Err(AppError::NotFound("Order not found".to_string())),
    };
    info!(
        event_id = %event_id,
        order_id = %order_id,
        ticket_id = %issued.payload.ticket_id,
        "Merchandise order approved"
    );

    if let (Some(profile), Some(placed)) = (profile, approved.order()) {
        let item_name = event
            .merchandise
            .as_ref()
            .map_or(event.name.as_str(), |m| m.item_name.as_str());
        spawn_email(
            state.notifier.clone(),
            approval_email(
                &profile.email,
                item_name,
                &issued.payload.ticket_id,
                placed.purchase.total_amount,
                issued.png,
            ),
        );
    }
    Ok(approved)
}

pub async fn reject(
    state: &AppState,
    organizer_id: Uuid,
    event_id: Uuid,
    order_id: Uuid,
    comment: Option<String>,
) -> Result<Registration, AppError> {
    owned_order(state, organizer_id, event_id, order_id).await?;
    let comment = comment.filter(|c| !c.trim().is_empty());
    let now = state.clock.now();

    match state
        .store
        .reject_order(order_id, comment.as_deref(), now)
        .await?
    {
        Some(rejected) => {
            info!(event_id = %event_id, order_id = %order_id, "Merchandise order rejected");
            Ok(rejected)
        }
        None => {
            let current = state.store.get_registration(order_id).await?;
            Err(AppError::NotPending(current.and_then(|r| r.payment_status())))
        }
    }
}

/// Orders of an event. Without a filter every record with a payment status is returned.
pub async fn list_orders(
    state: &AppState,
    organizer_id: Uuid,
    event_id: Uuid,
    filter: OrderFilter,
) -> Result<Vec<ParticipantRegistration>, AppError> {
    owned_event(state, organizer_id, event_id).await?;
    let payment = filter
        .status
        .map_or(PaymentFilter::Orders, PaymentFilter::Status);
    let orders = state
        .store
        .list_registrations(&RegistrationQuery {
            event_id: Some(event_id),
            payment,
            ..RegistrationQuery::default()
        })
        .await?;
    with_participants(state, orders).await
}
