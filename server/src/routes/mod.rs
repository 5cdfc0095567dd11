use axum::extract::DefaultBodyLimit;
use axum::routing::{get, patch, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, SecurityHeaders};
use crate::handlers::{attendance, events, health_check, orders, registrations, reports};
use crate::services::proofs::MAX_PROOF_BYTES;
use crate::state::AppState;

/// Multipart framing on top of the largest accepted proof image.
const PURCHASE_BODY_LIMIT: usize = MAX_PROOF_BYTES + 64 * 1024;

fn event_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(events::list_published).post(events::create_event))
        .route("/my-registrations", get(registrations::my_registrations))
        .route("/tickets/:ticket_id", get(registrations::ticket))
        .route("/attendance/mark", post(attendance::mark))
        .route("/organizer/events", get(events::organizer_events))
        .route("/organizer/dashboard", get(reports::dashboard))
        .route(
            "/organizer/events/:event_id/analytics",
            get(reports::analytics),
        )
        .route("/:event_id", get(events::get_event))
        .route("/:event_id/publish", patch(events::publish_event))
        .route("/:event_id/update", put(events::update_event))
        .route(
            "/:event_id/register",
            post(registrations::register).delete(registrations::cancel),
        )
        .route(
            "/:event_id/purchase",
            post(orders::purchase).layer(DefaultBodyLimit::max(PURCHASE_BODY_LIMIT)),
        )
        .route(
            "/:event_id/registrations",
            get(registrations::event_registrations),
        )
        .route("/:event_id/csv", get(reports::export_csv))
        .route("/:event_id/attendance/scan", post(attendance::scan))
        .route(
            "/:event_id/attendance/manual",
            post(attendance::manual_override),
        )
        .route("/:event_id/orders", get(orders::list_orders))
        .route(
            "/:event_id/orders/:order_id/approve",
            patch(orders::approve),
        )
        .route("/:event_id/orders/:order_id/reject", patch(orders::reject))
}

pub fn create_routes(state: AppState) -> Router {
    let router = Router::new()
        .route("/health", get(health_check))
        .nest("/api/events", event_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    SecurityHeaders::from_env()
        .apply(router)
        .layer(create_cors_layer())
}
