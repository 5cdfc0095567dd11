use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, warn};

use crate::models::{Eligibility, EventStatus, PaymentStatus, RegistrationStatus};
use crate::store::StoreError;
use crate::utils::response::error as error_response;

/// Who already holds an attended ticket, returned to the operator on a repeated scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateScan {
    pub ticket_id: Option<String>,
    pub attended_at: DateTime<Utc>,
    pub participant: ParticipantSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticipantSummary {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Field '{0}' is required.")]
    FormValidation(String),

    #[error("Event is not open for registration")]
    EventNotOpen,

    #[error("Registration deadline has passed")]
    DeadlinePassed,

    #[error("This event is only for {0} participants")]
    EligibilityMismatch(Eligibility),

    #[error("Already registered for this event")]
    AlreadyRegistered,

    #[error("Registration limit reached")]
    CapacityReached,

    #[error("Purchase limit is {limit} items per participant")]
    PurchaseLimitExceeded { limit: i32 },

    #[error("Insufficient stock for this variant")]
    InsufficientStock { available: i32, requested: i32 },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: EventStatus, to: EventStatus },

    #[error("Field '{0}' can no longer be changed")]
    FieldLocked(&'static str),

    #[error("This ticket belongs to a different event")]
    WrongEvent,

    #[error("Ticket status: {0}")]
    TicketInvalid(RegistrationStatus),

    #[error("Already scanned, attendance was already marked")]
    DuplicateScan(Box<DuplicateScan>),

    #[error("Order is not in pending status")]
    NotPending(Option<PaymentStatus>),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Database error")]
    DatabaseError(#[from] StoreError),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) | AppError::FormValidation(_) => StatusCode::BAD_REQUEST,
            AppError::EventNotOpen
            | AppError::DeadlinePassed
            | AppError::AlreadyRegistered
            | AppError::CapacityReached
            | AppError::PurchaseLimitExceeded { .. }
            | AppError::InsufficientStock { .. }
            | AppError::InvalidTransition { .. }
            | AppError::FieldLocked(_)
            | AppError::WrongEvent
            | AppError::TicketInvalid(_) => StatusCode::BAD_REQUEST,
            AppError::EligibilityMismatch(_) => StatusCode::FORBIDDEN,
            AppError::DuplicateScan(_) | AppError::NotPending(_) | AppError::Conflict(_) => {
                StatusCode::CONFLICT
            }
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::FormValidation(_) => "FORM_VALIDATION",
            AppError::EventNotOpen => "EVENT_NOT_OPEN",
            AppError::DeadlinePassed => "DEADLINE_PASSED",
            AppError::EligibilityMismatch(_) => "ELIGIBILITY_MISMATCH",
            AppError::AlreadyRegistered => "ALREADY_REGISTERED",
            AppError::CapacityReached => "CAPACITY_REACHED",
            AppError::PurchaseLimitExceeded { .. } => "PURCHASE_LIMIT_EXCEEDED",
            AppError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            AppError::InvalidTransition { .. } => "INVALID_TRANSITION",
            AppError::FieldLocked(_) => "FIELD_LOCKED",
            AppError::WrongEvent => "WRONG_EVENT",
            AppError::TicketInvalid(_) => "TICKET_INVALID",
            AppError::DuplicateScan(_) => "DUPLICATE_SCAN",
            AppError::NotPending(_) => "NOT_PENDING",
            AppError::Conflict(_) => "CONFLICT",
            AppError::AuthError(_) => "AUTH_ERROR",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::ExternalServiceError(_) => "EXTERNAL_SERVICE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Prior-state context returned alongside business-rule rejections.
    pub fn details(&self) -> Option<Value> {
        match self {
            AppError::DuplicateScan(scan) => Some(json!({
                "duplicate": true,
                "ticketId": scan.ticket_id,
                "attendedAt": scan.attended_at,
                "participant": scan.participant,
            })),
            AppError::NotPending(status) => Some(json!({ "paymentStatus": status })),
            AppError::InsufficientStock {
                available,
                requested,
            } => Some(json!({ "available": available, "requested": requested })),
            AppError::InvalidTransition { from, to } => Some(json!({ "from": from, "to": to })),
            _ => None,
        }
    }

    fn log(&self) {
        match self {
            AppError::DatabaseError(e) => {
                error!(error = ?e, "Database error");
            }
            AppError::ExternalServiceError(msg) | AppError::InternalServerError(msg) => {
                error!(error = ?self, message = %msg, "Application error");
            }
            _ => {
                warn!(code = self.code(), message = %self, "Request rejected");
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Log internal details
        self.log();

        // Only expose high-level message to the client
        let public_message = match &self {
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            AppError::InternalServerError(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        error_response(code, public_message, self.details(), status)
    }
}
