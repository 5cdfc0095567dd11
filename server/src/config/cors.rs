use axum::http::{header, HeaderName, HeaderValue, Method};
use std::env;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::utils::auth::{USER_DISABLED_HEADER, USER_ID_HEADER, USER_ROLE_HEADER};

const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://localhost:5173";
const PREFLIGHT_MAX_AGE: Duration = Duration::from_secs(86400);

const ALLOWED_METHODS: [Method; 6] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
    Method::OPTIONS,
];

/// Browser clients forward the gateway identity headers on every call.
fn allowed_headers() -> [HeaderName; 8] {
    [
        header::CONTENT_TYPE,
        header::AUTHORIZATION,
        header::ACCEPT,
        header::ORIGIN,
        HeaderName::from_static("x-requested-with"),
        HeaderName::from_static(USER_ID_HEADER),
        HeaderName::from_static(USER_ROLE_HEADER),
        HeaderName::from_static(USER_DISABLED_HEADER),
    ]
}

/// The CSV export is downloaded cross-origin, so its filename must be readable.
fn exposed_headers() -> [HeaderName; 4] {
    [
        header::CONTENT_LENGTH,
        header::CONTENT_TYPE,
        header::CONTENT_DISPOSITION,
        HeaderName::from_static("x-request-id"),
    ]
}

pub fn create_cors_layer() -> CorsLayer {
    let raw =
        env::var("CORS_ALLOWED_ORIGINS").unwrap_or_else(|_| DEFAULT_ALLOWED_ORIGINS.to_string());

    CorsLayer::new()
        .allow_origin(allow_origin(parse_origins(&raw)))
        .allow_methods(ALLOWED_METHODS)
        .allow_headers(allowed_headers())
        .expose_headers(exposed_headers())
        .allow_credentials(true)
        .max_age(PREFLIGHT_MAX_AGE)
}

fn parse_origins(raw: &str) -> Vec<HeaderValue> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => {
                tracing::debug!("CORS: Allowing origin: {}", origin);
                Some(value)
            }
            Err(e) => {
                tracing::warn!("CORS: Invalid origin '{}': {}", origin, e);
                None
            }
        })
        .collect()
}

fn allow_origin(origins: Vec<HeaderValue>) -> AllowOrigin {
    if origins.is_empty() {
        // Credentials rule out `*`, so echo the caller's origin instead.
        tracing::warn!("CORS: No valid origins configured, mirroring request origin");
        AllowOrigin::mirror_request()
    } else {
        tracing::info!("CORS: Configured with {} allowed origin(s)", origins.len());
        AllowOrigin::list(origins)
    }
}
