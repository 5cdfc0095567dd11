//! The JSON envelope every endpoint answers with:
//! `{ success, data, message }` on success and
//! `{ success: false, error: { code, message, details } }` on failure.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

#[derive(Serialize)]
pub struct ApiResponse<T>
where
    T: Serialize,
{
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: Option<T>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data,
            message: Some(message.into()),
        }
    }
}

#[derive(Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
    pub details: Option<Value>,
}

#[derive(Serialize)]
pub struct ApiErrorResponse {
    pub success: bool,
    pub error: ApiErrorBody,
}

pub fn success<T>(data: T, message: impl Into<String>) -> impl IntoResponse
where
    T: Serialize,
{
    (StatusCode::OK, Json(ApiResponse::ok(Some(data), message)))
}

pub fn created<T>(data: T, message: impl Into<String>) -> impl IntoResponse
where
    T: Serialize,
{
    (StatusCode::CREATED, Json(ApiResponse::ok(Some(data), message)))
}

pub fn empty_success(message: impl Into<String>) -> impl IntoResponse {
    (StatusCode::OK, Json(ApiResponse::<()>::ok(None, message)))
}

pub fn error(
    code: &str,
    message: impl Into<String>,
    details: Option<Value>,
    status: StatusCode,
) -> Response {
    let body = ApiErrorResponse {
        success: false,
        error: ApiErrorBody {
            code: code.to_string(),
            message: message.into(),
            details,
        },
    };

    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_of(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn error_envelope_carries_code_and_details() {
        let response = error(
            "NOT_PENDING",
            "Order is not in pending status",
            Some(serde_json::json!({ "paymentStatus": "APPROVED" })),
            StatusCode::CONFLICT,
        );
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = body_of(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "NOT_PENDING");
        assert_eq!(body["error"]["details"]["paymentStatus"], "APPROVED");
    }

    #[tokio::test]
    async fn created_uses_201() {
        let response = created("x", "Created").into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body_of(response).await["data"], "x");
    }

    #[tokio::test]
    async fn empty_success_has_null_data() {
        let body = body_of(empty_success("Done").into_response()).await;
        assert_eq!(body["success"], true);
        assert!(body["data"].is_null());
        assert_eq!(body["message"], "Done");
    }
}
