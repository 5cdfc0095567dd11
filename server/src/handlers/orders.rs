use axum::extract::{Multipart, Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::services::merchandise::{
    self, OrderFilter, PaymentProof, PurchaseRequest, RejectRequest,
};
use crate::state::AppState;
use crate::utils::auth::Principal;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

const PROOF_FIELD: &str = "paymentProof";

fn bad_form(e: impl std::fmt::Display) -> AppError {
    AppError::ValidationError(format!("Invalid purchase form: {e}"))
}

/// Reads `size`, `color`, `quantity` and the `paymentProof` file from the form.
async fn read_purchase_form(
    mut multipart: Multipart,
) -> Result<(PurchaseRequest, PaymentProof), AppError> {
    let mut size = None;
    let mut color = None;
    let mut quantity = None;
    let mut proof = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_form)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            PROOF_FIELD => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(bad_form)?;
                proof = Some(PaymentProof {
                    filename,
                    bytes: bytes.to_vec(),
                });
            }
            "size" => size = Some(field.text().await.map_err(bad_form)?),
            "color" => color = Some(field.text().await.map_err(bad_form)?),
            "quantity" => {
                let text = field.text().await.map_err(bad_form)?;
                let parsed = text.trim().parse::<i32>().map_err(|_| {
                    AppError::ValidationError("Quantity must be a whole number".to_string())
                })?;
                quantity = Some(parsed);
            }
            _ => {}
        }
    }

    let (Some(size), Some(color), Some(quantity)) = (size, color, quantity) else {
        return Err(AppError::ValidationError(
            "size, color and quantity are required".to_string(),
        ));
    };
    let proof = proof.ok_or_else(|| {
        AppError::ValidationError("Payment proof image is required".to_string())
    })?;
    Ok((
        PurchaseRequest {
            size,
            color,
            quantity,
        },
        proof,
    ))
}

pub async fn purchase(
    State(state): State<AppState>,
    principal: Principal,
    Path(event_id): Path<Uuid>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let participant_id = principal.require_participant()?;
    let (request, proof) = read_purchase_form(multipart).await?;
    let order =
        merchandise::request_purchase(&state, event_id, participant_id, request, proof).await?;
    Ok(created(order, "Order placed successfully. Pending organizer approval.").into_response())
}

pub async fn list_orders(
    State(state): State<AppState>,
    principal: Principal,
    Path(event_id): Path<Uuid>,
    Query(filter): Query<OrderFilter>,
) -> Result<Response, AppError> {
    let organizer_id = principal.require_organizer()?;
    let orders = merchandise::list_orders(&state, organizer_id, event_id, filter).await?;
    Ok(success(orders, "Merchandise orders").into_response())
}

pub async fn approve(
    State(state): State<AppState>,
    principal: Principal,
    Path((event_id, order_id)): Path<(Uuid, Uuid)>,
) -> Result<Response, AppError> {
    let organizer_id = principal.require_organizer()?;
    let order = merchandise::approve(&state, organizer_id, event_id, order_id).await?;
    Ok(success(order, "Payment approved, ticket generated").into_response())
}

pub async fn reject(
    State(state): State<AppState>,
    principal: Principal,
    Path((event_id, order_id)): Path<(Uuid, Uuid)>,
    body: Option<Json<RejectRequest>>,
) -> Result<Response, AppError> {
    let organizer_id = principal.require_organizer()?;
    let comment = body.and_then(|Json(b)| b.comment);
    let order = merchandise::reject(&state, organizer_id, event_id, order_id, comment).await?;
    Ok(success(order, "Payment rejected").into_response())
}
