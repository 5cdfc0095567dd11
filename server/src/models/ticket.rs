use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::QrCode;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use uuid::Uuid;

use crate::models::Ticket;
use crate::utils::error::AppError;

const QR_MIN_DIMENSION: u32 = 200;

/// The scannable record encoded in a ticket's QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TicketPayload {
    pub event_name: String,
    pub event_id: Uuid,
    pub ticket_id: String,
    pub participant: String,
}

impl TicketPayload {
    pub fn new(event_name: &str, event_id: Uuid, participant: &str) -> Self {
        Self {
            event_name: event_name.to_string(),
            event_id,
            ticket_id: Uuid::new_v4().to_string(),
            participant: participant.to_string(),
        }
    }

    pub fn parse(qr_data: &str) -> Result<Self, AppError> {
        serde_json::from_str(qr_data)
            .map_err(|_| AppError::ValidationError("Invalid QR code data".to_string()))
    }

    /// Rejects payloads minted for another event than the one being scanned.
    pub fn verify_event(&self, scanning_event: Uuid) -> Result<(), AppError> {
        if self.event_id == scanning_event {
            Ok(())
        } else {
            Err(AppError::WrongEvent)
        }
    }

    pub fn to_json(&self) -> Result<String, AppError> {
        serde_json::to_string(self)
            .map_err(|e| AppError::InternalServerError(format!("ticket payload: {e}")))
    }

    /// Renders the payload as a QR code PNG.
    pub fn issue(self) -> Result<IssuedTicket, AppError> {
        let data = self.to_json()?;
        let code = QrCode::new(data.as_bytes())
            .map_err(|e| AppError::InternalServerError(format!("qr encode: {e}")))?;
        let image = code
            .render::<Luma<u8>>()
            .min_dimensions(QR_MIN_DIMENSION, QR_MIN_DIMENSION)
            .build();

        let mut png = Vec::new();
        DynamicImage::ImageLuma8(image)
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| AppError::InternalServerError(format!("qr render: {e}")))?;

        Ok(IssuedTicket {
            payload: self,
            png,
        })
    }
}

/// A freshly minted ticket: the authoritative payload and its rendered code.
#[derive(Debug, Clone)]
pub struct IssuedTicket {
    pub payload: TicketPayload,
    pub png: Vec<u8>,
}

impl IssuedTicket {
    pub fn data_url(&self) -> String {
        format!("data:image/png;base64,{}", STANDARD.encode(&self.png))
    }

    pub fn ticket(&self) -> Ticket {
        Ticket {
            ticket_id: self.payload.ticket_id.clone(),
            qr_code: self.data_url(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_uses_the_wire_key_set() {
        let event_id = Uuid::new_v4();
        let payload = TicketPayload::new("Hack Night", event_id, "ada@example.com");
        let value: serde_json::Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();
        let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["eventId", "eventName", "participant", "ticketId"]);
        assert_eq!(value["eventId"], event_id.to_string());
    }

    #[test]
    fn scanned_payload_resolves_to_the_issued_ticket() {
        let event_id = Uuid::new_v4();
        let issued = TicketPayload::new("Hack Night", event_id, "ada@example.com")
            .issue()
            .unwrap();
        assert!(issued.png.starts_with(&[0x89, b'P', b'N', b'G']));
        assert!(issued.data_url().starts_with("data:image/png;base64,"));

        let scanned = TicketPayload::parse(&issued.payload.to_json().unwrap()).unwrap();
        assert_eq!(scanned, issued.payload);
        assert!(scanned.verify_event(event_id).is_ok());
        assert!(matches!(
            scanned.verify_event(Uuid::new_v4()),
            Err(AppError::WrongEvent)
        ));
    }

    #[test]
    fn ticket_ids_are_unique() {
        let event_id = Uuid::new_v4();
        let a = TicketPayload::new("E", event_id, "p");
        let b = TicketPayload::new("E", event_id, "p");
        assert_ne!(a.ticket_id, b.ticket_id);
    }

    #[test]
    fn malformed_qr_data_is_a_validation_error() {
        assert!(matches!(
            TicketPayload::parse("not json"),
            Err(AppError::ValidationError(_))
        ));
        assert!(TicketPayload::parse(r#"{"ticketId":"x"}"#).is_err());
    }
}
