use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::utils::response::success;

pub mod attendance;
pub mod events;
pub mod orders;
pub mod registrations;
pub mod reports;

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "eventdesk-api",
    };

    success(payload, "Health check successful").into_response()
}
