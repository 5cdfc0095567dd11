//! Outbound notifications. Delivery is best-effort: callers spawn it after
//! the state change has committed and only log failures.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::models::Event;
use crate::utils::error::AppError;

#[derive(Debug, Clone, PartialEq)]
pub struct InlineImage {
    pub cid: String,
    pub filename: String,
    pub png: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body_html: String,
    pub inline_image: Option<InlineImage>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_email(&self, message: EmailMessage) -> Result<(), AppError>;

    async fn post_webhook(&self, url: &str, summary: String) -> Result<(), AppError>;
}

/// Posts webhooks directly and hands e-mail to an HTTP relay when one is configured.
pub struct HttpNotifier {
    client: reqwest::Client,
    email_relay_url: Option<String>,
}

impl HttpNotifier {
    pub fn new(timeout: Duration, email_relay_url: Option<String>) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::InternalServerError(format!("http client: {e}")))?;
        Ok(Self {
            client,
            email_relay_url,
        })
    }

    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<(), AppError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::ExternalServiceError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AppError::ExternalServiceError(format!(
                "{url} answered {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send_email(&self, message: EmailMessage) -> Result<(), AppError> {
        let Some(relay) = &self.email_relay_url else {
            info!(to = %message.to, subject = %message.subject, "No e-mail relay configured, message dropped");
            return Ok(());
        };

        let attachments: Vec<_> = message
            .inline_image
            .iter()
            .map(|image| {
                json!({
                    "filename": image.filename,
                    "cid": image.cid,
                    "contentType": "image/png",
                    "content": STANDARD.encode(&image.png),
                })
            })
            .collect();
        let body = json!({
            "to": message.to,
            "subject": message.subject,
            "html": message.body_html,
            "attachments": attachments,
        });
        self.post_json(relay, &body).await?;
        debug!(to = %message.to, "E-mail handed to relay");
        Ok(())
    }

    async fn post_webhook(&self, url: &str, summary: String) -> Result<(), AppError> {
        self.post_json(url, &json!({ "content": summary })).await
    }
}

/// Fire-and-forget e-mail delivery.
pub fn spawn_email(notifier: Arc<dyn Notifier>, message: EmailMessage) {
    tokio::spawn(async move {
        let to = message.to.clone();
        if let Err(e) = notifier.send_email(message).await {
            warn!(to = %to, error = %e, "Failed to send e-mail");
        }
    });
}

/// Fire-and-forget webhook delivery.
pub fn spawn_webhook(notifier: Arc<dyn Notifier>, url: String, summary: String) {
    tokio::spawn(async move {
        if let Err(e) = notifier.post_webhook(&url, summary).await {
            warn!(url = %url, error = %e, "Failed to post webhook");
        }
    });
}

pub fn published_announcement(event: &Event) -> String {
    format!(
        "📢 **New Event Published!**\n\n**{}**\n{}\n\n📅 Date: {}",
        event.name,
        event.description,
        event.event_start_date.format("%a %b %d %Y")
    )
}

pub fn registration_email(to: &str, event: &Event, ticket_id: &str, png: Vec<u8>) -> EmailMessage {
    EmailMessage {
        to: to.to_string(),
        subject: "Event Registration Successful".to_string(),
        body_html: format!(
            "<h2>You're Registered Successfully!</h2>\
             <p><strong>Event:</strong> {}</p>\
             <p><strong>Ticket ID:</strong> {}</p>\
             <p>Please show this QR code at entry:</p>\
             <img src=\"cid:event-qrcode\" width=\"200\" />",
            event.name, ticket_id
        ),
        inline_image: Some(InlineImage {
            cid: "event-qrcode".to_string(),
            filename: "qrcode.png".to_string(),
            png,
        }),
    }
}

pub fn approval_email(
    to: &str,
    item_name: &str,
    ticket_id: &str,
    total: rust_decimal::Decimal,
    png: Vec<u8>,
) -> EmailMessage {
    EmailMessage {
        to: to.to_string(),
        subject: "Merchandise Purchase Approved!".to_string(),
        body_html: format!(
            "<h2>Payment Approved!</h2>\
             <p><strong>Item:</strong> {item_name}</p>\
             <p><strong>Ticket ID:</strong> {ticket_id}</p>\
             <p><strong>Total Paid:</strong> {total}</p>\
             <p>Show this QR code for pickup:</p>\
             <img src=\"cid:merch-qrcode\" width=\"200\" />"
        ),
        inline_image: Some(InlineImage {
            cid: "merch-qrcode".to_string(),
            filename: "qrcode.png".to_string(),
            png,
        }),
    }
}
