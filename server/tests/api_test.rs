use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use eventdesk_server::models::{OrganizerProfile, ParticipantProfile, ParticipantType};
use eventdesk_server::routes::create_routes;
use eventdesk_server::services::notify::HttpNotifier;
use eventdesk_server::services::proofs::LocalProofStore;
use eventdesk_server::state::AppState;
use eventdesk_server::store::MemoryStore;
use eventdesk_server::utils::clock::ManualClock;

const BOUNDARY: &str = "eventdesk-test-boundary";

struct TestApp {
    app: Router,
    store: Arc<MemoryStore>,
}

impl TestApp {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap(),
        ));
        let notifier = HttpNotifier::new(Duration::from_secs(1), None).unwrap();
        let uploads = std::env::temp_dir().join(format!("eventdesk-test-{}", Uuid::new_v4()));
        let state = AppState::new(
            store.clone(),
            clock,
            Arc::new(notifier),
            Arc::new(LocalProofStore::new(uploads)),
        );
        Self {
            app: create_routes(state),
            store,
        }
    }

    async fn organizer(&self) -> Uuid {
        let user_id = Uuid::new_v4();
        self.store
            .put_organizer(OrganizerProfile {
                user_id,
                organizer_name: "Chess Society".to_string(),
                contact_email: None,
                webhook_url: None,
            })
            .await;
        user_id
    }

    async fn participant(&self) -> Uuid {
        let user_id = Uuid::new_v4();
        self.store
            .put_participant(ParticipantProfile {
                user_id,
                first_name: "Grace".to_string(),
                last_name: "Hopper".to_string(),
                email: format!("{}@example.com", user_id.simple()),
                contact_number: "555-0199".to_string(),
                participant_type: ParticipantType::GroupA,
            })
            .await;
        user_id
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    async fn create_published(&self, organizer: Uuid, body: Value) -> String {
        let (status, created) = self
            .send(json_request(Method::POST, "/api/events", Some((organizer, "organizer")), body))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{created}");
        let id = created["data"]["id"].as_str().unwrap().to_string();

        let (status, published) = self
            .send(json_request(
                Method::PATCH,
                &format!("/api/events/{id}/publish"),
                Some((organizer, "organizer")),
                Value::Null,
            ))
            .await;
        assert_eq!(status, StatusCode::OK, "{published}");
        id
    }
}

fn json_request(method: Method, uri: &str, user: Option<(Uuid, &str)>, body: Value) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((id, role)) = user {
        builder = builder
            .header("x-user-id", id.to_string())
            .header("x-user-role", role);
    }
    if body.is_null() {
        builder.body(Body::empty()).unwrap()
    } else {
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }
}

fn talk() -> Value {
    json!({
        "name": "Endgame Workshop",
        "kind": "ORDINARY",
        "registrationDeadline": "2025-01-02T09:00:00Z",
        "eventStartDate": "2025-01-03T09:00:00Z",
        "eventEndDate": "2025-01-03T17:00:00Z",
        "registrationLimit": 10,
        "registrationFee": 50
    })
}

fn tee_shirt() -> Value {
    json!({
        "name": "Society Tee",
        "kind": "MERCHANDISE",
        "registrationDeadline": "2025-01-02T09:00:00Z",
        "eventStartDate": "2025-01-03T09:00:00Z",
        "eventEndDate": "2025-01-03T17:00:00Z",
        "merchandise": {
            "itemName": "Tee",
            "price": 250,
            "purchaseLimitPerParticipant": 2,
            "variants": [{ "size": "L", "color": "White", "stock": 3 }]
        }
    })
}

fn purchase_form(size: &str, color: &str, quantity: i32) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in [("size", size.to_string()), ("color", color.to_string()), ("quantity", quantity.to_string())] {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"paymentProof\"; filename=\"receipt.png\"\r\nContent-Type: image/png\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a]);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

#[tokio::test]
async fn health_check_reports_service() {
    let app = TestApp::new();
    let (status, body) = app
        .send(json_request(Method::GET, "/health", None, Value::Null))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["service"], "eventdesk-api");
}

#[tokio::test]
async fn missing_identity_is_unauthorized() {
    let app = TestApp::new();
    let (status, body) = app
        .send(json_request(Method::POST, "/api/events", None, talk()))
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "AUTH_ERROR");
}

#[tokio::test]
async fn participants_cannot_create_events() {
    let app = TestApp::new();
    let participant = app.participant().await;
    let (status, body) = app
        .send(json_request(
            Method::POST,
            "/api/events",
            Some((participant, "participant")),
            talk(),
        ))
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");
}

#[tokio::test]
async fn register_then_scan_twice_reports_duplicate() {
    let app = TestApp::new();
    let organizer = app.organizer().await;
    let participant = app.participant().await;
    let event_id = app.create_published(organizer, talk()).await;

    let (status, listed) = app
        .send(json_request(
            Method::GET,
            "/api/events",
            Some((participant, "participant")),
            Value::Null,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);

    let (status, registered) = app
        .send(json_request(
            Method::POST,
            &format!("/api/events/{event_id}/register"),
            Some((participant, "participant")),
            Value::Null,
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{registered}");
    assert_eq!(registered["data"]["status"], "REGISTERED");
    let ticket_id = registered["data"]["ticketId"].as_str().unwrap().to_string();

    let (status, again) = app
        .send(json_request(
            Method::POST,
            &format!("/api/events/{event_id}/register"),
            Some((participant, "participant")),
            Value::Null,
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(again["error"]["code"], "ALREADY_REGISTERED");

    let mark = || {
        json_request(
            Method::POST,
            "/api/events/attendance/mark",
            Some((organizer, "organizer")),
            json!({ "ticketId": ticket_id }),
        )
    };
    let (status, first) = app.send(mark()).await;
    assert_eq!(status, StatusCode::OK, "{first}");
    assert_eq!(first["data"]["attended"], true);

    let (status, second) = app.send(mark()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(second["success"], false);
    assert_eq!(second["error"]["code"], "DUPLICATE_SCAN");
    assert_eq!(second["error"]["details"]["duplicate"], true);
    assert_eq!(second["error"]["details"]["ticketId"], ticket_id.as_str());
    assert_eq!(
        second["error"]["details"]["participant"]["name"],
        "Grace Hopper"
    );
}

#[tokio::test]
async fn merchandise_purchase_is_approved_by_owner() {
    let app = TestApp::new();
    let organizer = app.organizer().await;
    let buyer = app.participant().await;
    let event_id = app.create_published(organizer, tee_shirt()).await;

    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/api/events/{event_id}/purchase"))
        .header("x-user-id", buyer.to_string())
        .header("x-user-role", "participant")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(purchase_form("L", "White", 2)))
        .unwrap();
    let (status, placed) = app.send(request).await;
    assert_eq!(status, StatusCode::CREATED, "{placed}");
    assert_eq!(placed["data"]["paymentStatus"], "PENDING");
    assert!(placed["data"]["ticketId"].is_null());
    let order_id = placed["data"]["id"].as_str().unwrap().to_string();

    let approve = || {
        json_request(
            Method::PATCH,
            &format!("/api/events/{event_id}/orders/{order_id}/approve"),
            Some((organizer, "organizer")),
            Value::Null,
        )
    };
    let (status, approved) = app.send(approve()).await;
    assert_eq!(status, StatusCode::OK, "{approved}");
    assert_eq!(approved["data"]["paymentStatus"], "APPROVED");
    assert!(approved["data"]["ticketId"].is_string());

    let (status, repeat) = app.send(approve()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(repeat["error"]["code"], "NOT_PENDING");
    assert_eq!(repeat["error"]["details"]["paymentStatus"], "APPROVED");

    let (_, event) = app
        .send(json_request(
            Method::GET,
            &format!("/api/events/{event_id}"),
            None,
            Value::Null,
        ))
        .await;
    assert_eq!(event["data"]["merchandise"]["variants"][0]["stock"], 1);
    assert_eq!(event["data"]["merchandise"]["totalStock"], 1);
}

#[tokio::test]
async fn csv_export_is_served_as_attachment() {
    let app = TestApp::new();
    let organizer = app.organizer().await;
    let participant = app.participant().await;
    let event_id = app.create_published(organizer, talk()).await;
    let (status, _) = app
        .send(json_request(
            Method::POST,
            &format!("/api/events/{event_id}/register"),
            Some((participant, "participant")),
            Value::Null,
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let response = app
        .app
        .clone()
        .oneshot(json_request(
            Method::GET,
            &format!("/api/events/{event_id}/csv"),
            Some((organizer, "organizer")),
            Value::Null,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/csv"));
    assert!(response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains(&format!("participants-{event_id}.csv")));

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let csv = String::from_utf8(bytes.to_vec()).unwrap();
    assert_eq!(csv.lines().count(), 2);
    assert!(csv.contains("\"Grace Hopper\""));
}

#[tokio::test]
async fn responses_carry_security_headers() {
    let app = TestApp::new();
    let response = app
        .app
        .clone()
        .oneshot(json_request(Method::GET, "/health", None, Value::Null))
        .await
        .unwrap();

    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert_eq!(response.headers()["x-frame-options"], "DENY");
}
