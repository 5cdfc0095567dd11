use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::text_enum;
use crate::models::ParticipantType;
use crate::utils::error::AppError;

text_enum! {
    pub enum EventKind {
        Ordinary => "ORDINARY",
        Merchandise => "MERCHANDISE",
    }
}

text_enum! {
    pub enum Eligibility {
        GroupA => "GROUP_A",
        GroupB => "GROUP_B",
        All => "ALL",
    }
}

text_enum! {
    pub enum EventStatus {
        Draft => "DRAFT",
        Published => "PUBLISHED",
        Ongoing => "ONGOING",
        Completed => "COMPLETED",
        Closed => "CLOSED",
    }
}

text_enum! {
    pub enum FormFieldType {
        Text => "TEXT",
        Number => "NUMBER",
        Dropdown => "DROPDOWN",
        Checkbox => "CHECKBOX",
        File => "FILE",
    }
}

impl Eligibility {
    pub fn admits(self, participant_type: ParticipantType) -> bool {
        match self {
            Eligibility::All => true,
            Eligibility::GroupA => participant_type == ParticipantType::GroupA,
            Eligibility::GroupB => participant_type == ParticipantType::GroupB,
        }
    }
}

impl EventStatus {
    /// Persisted transitions an owner may request from this status.
    pub const fn allowed_targets(self) -> &'static [EventStatus] {
        match self {
            EventStatus::Draft => &[EventStatus::Published],
            EventStatus::Published => &[EventStatus::Ongoing, EventStatus::Closed],
            EventStatus::Ongoing => &[EventStatus::Completed],
            EventStatus::Completed | EventStatus::Closed => &[],
        }
    }

    pub fn transition_to(self, target: EventStatus) -> Result<EventStatus, AppError> {
        if self.allowed_targets().contains(&target) {
            Ok(target)
        } else {
            Err(AppError::InvalidTransition {
                from: self,
                to: target,
            })
        }
    }
}

/// Status shown to readers. Only PUBLISHED events are re-labelled, from the clock alone.
pub fn display_status(
    persisted: EventStatus,
    now: DateTime<Utc>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> EventStatus {
    if persisted != EventStatus::Published {
        return persisted;
    }
    if now > end {
        EventStatus::Completed
    } else if start <= now {
        EventStatus::Ongoing
    } else {
        persisted
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub size: String,
    pub color: String,
    pub stock: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerchandiseDetails {
    pub item_name: String,
    pub unit_price: Decimal,
    pub purchase_limit_per_participant: i32,
    pub variants: Vec<Variant>,
    pub total_stock: i32,
}

impl MerchandiseDetails {
    pub fn new(
        item_name: String,
        unit_price: Decimal,
        purchase_limit_per_participant: i32,
        variants: Vec<Variant>,
    ) -> Self {
        let total_stock = variants.iter().map(|v| v.stock).sum();
        Self {
            item_name,
            unit_price,
            purchase_limit_per_participant,
            variants,
            total_stock,
        }
    }

    pub fn variant(&self, size: &str, color: &str) -> Option<&Variant> {
        self.variants
            .iter()
            .find(|v| v.size == size && v.color == color)
    }

    /// Takes `quantity` units from one variant, keeping the total in step.
    /// Returns the stock left on the variant, or what was available when it falls short.
    pub(crate) fn take_stock(&mut self, size: &str, color: &str, quantity: i32) -> Result<i32, i32> {
        let Some(variant) = self
            .variants
            .iter_mut()
            .find(|v| v.size == size && v.color == color)
        else {
            return Err(0);
        };
        if variant.stock < quantity {
            return Err(variant.stock);
        }
        variant.stock -= quantity;
        self.total_stock -= quantity;
        Ok(variant.stock)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.item_name.trim().is_empty() || self.unit_price <= Decimal::ZERO {
            return Err(AppError::ValidationError(
                "Merchandise events require itemName and a positive price".to_string(),
            ));
        }
        if self.purchase_limit_per_participant < 1 {
            return Err(AppError::ValidationError(
                "Purchase limit per participant must be at least 1".to_string(),
            ));
        }
        for (i, variant) in self.variants.iter().enumerate() {
            if variant.stock < 0 {
                return Err(AppError::ValidationError(format!(
                    "Stock for variant {}/{} cannot be negative",
                    variant.size, variant.color
                )));
            }
            if self.variants[..i]
                .iter()
                .any(|v| v.size == variant.size && v.color == variant.color)
            {
                return Err(AppError::ValidationError(format!(
                    "Variant {}/{} is listed twice",
                    variant.size, variant.color
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormField {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FormFieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Vec<String>,
}

impl FormField {
    /// Rejects the first required field that is absent or blank.
    pub fn check_responses(
        form: &[FormField],
        responses: &BTreeMap<String, String>,
    ) -> Result<(), AppError> {
        for field in form.iter().filter(|f| f.required) {
            let answered = responses
                .get(&field.label)
                .is_some_and(|v| !v.trim().is_empty());
            if !answered {
                return Err(AppError::FormValidation(field.label.clone()));
            }
        }
        Ok(())
    }
}

/// Built from validated input and from the store; only ever serialized outward.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    pub organizer_id: Uuid,
    pub name: String,
    pub description: String,
    pub kind: EventKind,
    pub eligibility: Eligibility,
    pub tags: Vec<String>,
    pub registration_deadline: DateTime<Utc>,
    pub event_start_date: DateTime<Utc>,
    pub event_end_date: DateTime<Utc>,
    pub registration_limit: i32,
    pub registration_fee: Decimal,
    #[serde(rename = "persistedStatus")]
    pub status: EventStatus,
    pub merchandise: Option<MerchandiseDetails>,
    pub custom_form: Vec<FormField>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn validate_schedule(
        deadline: DateTime<Utc>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if start > end {
            return Err(AppError::ValidationError(
                "Event start date cannot be after end date".to_string(),
            ));
        }
        if deadline >= start {
            return Err(AppError::ValidationError(
                "Registration deadline must be before event start date".to_string(),
            ));
        }
        Ok(())
    }

    /// Checks every structural invariant an event must satisfy before it is stored.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::ValidationError("Event name is required".to_string()));
        }
        if self.registration_limit < 0 {
            return Err(AppError::ValidationError(
                "Registration limit cannot be negative".to_string(),
            ));
        }
        if self.registration_fee < Decimal::ZERO {
            return Err(AppError::ValidationError(
                "Registration fee cannot be negative".to_string(),
            ));
        }
        Self::validate_schedule(
            self.registration_deadline,
            self.event_start_date,
            self.event_end_date,
        )?;
        match (self.kind, &self.merchandise) {
            (EventKind::Merchandise, Some(details)) => details.validate(),
            (EventKind::Merchandise, None) => Err(AppError::ValidationError(
                "Merchandise events require merchandise details".to_string(),
            )),
            (EventKind::Ordinary, Some(_)) => Err(AppError::ValidationError(
                "Only merchandise events carry merchandise details".to_string(),
            )),
            (EventKind::Ordinary, None) => Ok(()),
        }
    }

    pub fn is_merchandise(&self) -> bool {
        self.kind == EventKind::Merchandise
    }

    pub fn registration_open(&self, now: DateTime<Utc>) -> Result<(), AppError> {
        if self.status != EventStatus::Published {
            return Err(AppError::EventNotOpen);
        }
        if now > self.registration_deadline {
            return Err(AppError::DeadlinePassed);
        }
        Ok(())
    }

    pub fn check_eligibility(&self, participant_type: ParticipantType) -> Result<(), AppError> {
        if self.eligibility.admits(participant_type) {
            Ok(())
        } else {
            Err(AppError::EligibilityMismatch(self.eligibility))
        }
    }

    pub fn display_status(&self, now: DateTime<Utc>) -> EventStatus {
        display_status(self.status, now, self.event_start_date, self.event_end_date)
    }
}

/// An event as returned to readers, with the derived status overlaid.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventView {
    #[serde(flatten)]
    pub event: Event,
    pub status: EventStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registrations_count: Option<i64>,
}

impl EventView {
    pub fn at(event: Event, now: DateTime<Utc>) -> Self {
        let status = event.display_status(now);
        Self {
            event,
            status,
            registrations_count: None,
        }
    }

    pub fn with_count(mut self, count: i64) -> Self {
        self.registrations_count = Some(count);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(hours: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap() + Duration::hours(hours)
    }

    #[test]
    fn lifecycle_allows_only_documented_transitions() {
        use EventStatus::*;
        let all = [Draft, Published, Ongoing, Completed, Closed];
        let allowed = [
            (Draft, Published),
            (Published, Ongoing),
            (Published, Closed),
            (Ongoing, Completed),
        ];
        for from in all {
            for to in all {
                let result = from.transition_to(to);
                if allowed.contains(&(from, to)) {
                    assert_eq!(result.unwrap(), to);
                } else {
                    assert!(
                        matches!(result, Err(AppError::InvalidTransition { from: f, to: t }) if f == from && t == to),
                        "{from} -> {to} should be rejected"
                    );
                }
            }
        }
    }

    #[test]
    fn display_status_overlays_only_published_events() {
        let (start, end) = (at(10), at(20));
        assert_eq!(
            display_status(EventStatus::Published, at(5), start, end),
            EventStatus::Published
        );
        assert_eq!(
            display_status(EventStatus::Published, at(10), start, end),
            EventStatus::Ongoing
        );
        assert_eq!(
            display_status(EventStatus::Published, at(20), start, end),
            EventStatus::Ongoing
        );
        assert_eq!(
            display_status(EventStatus::Published, at(21), start, end),
            EventStatus::Completed
        );
        assert_eq!(
            display_status(EventStatus::Draft, at(21), start, end),
            EventStatus::Draft
        );
        assert_eq!(
            display_status(EventStatus::Closed, at(15), start, end),
            EventStatus::Closed
        );
    }

    #[test]
    fn schedule_requires_deadline_before_start_and_start_not_after_end() {
        assert!(Event::validate_schedule(at(0), at(1), at(1)).is_ok());
        assert!(Event::validate_schedule(at(1), at(1), at(2)).is_err());
        assert!(Event::validate_schedule(at(0), at(3), at(2)).is_err());
    }

    #[test]
    fn required_form_fields_reject_blank_answers() {
        let form = vec![
            FormField {
                id: "f1".to_string(),
                label: "Team name".to_string(),
                field_type: FormFieldType::Text,
                required: true,
                options: vec![],
            },
            FormField {
                id: "f2".to_string(),
                label: "Diet".to_string(),
                field_type: FormFieldType::Dropdown,
                required: false,
                options: vec!["veg".to_string()],
            },
        ];
        let mut responses = BTreeMap::new();
        assert!(matches!(
            FormField::check_responses(&form, &responses),
            Err(AppError::FormValidation(label)) if label == "Team name"
        ));
        responses.insert("Team name".to_string(), "   ".to_string());
        assert!(FormField::check_responses(&form, &responses).is_err());
        responses.insert("Team name".to_string(), "Rustaceans".to_string());
        assert!(FormField::check_responses(&form, &responses).is_ok());
    }

    #[test]
    fn taking_stock_keeps_total_consistent() {
        let mut details = MerchandiseDetails::new(
            "Club Tee".to_string(),
            Decimal::new(25000, 2),
            3,
            vec![
                Variant {
                    size: "M".to_string(),
                    color: "Black".to_string(),
                    stock: 2,
                },
                Variant {
                    size: "L".to_string(),
                    color: "Black".to_string(),
                    stock: 5,
                },
            ],
        );
        assert_eq!(details.total_stock, 7);
        assert_eq!(details.take_stock("M", "Black", 2), Ok(0));
        assert_eq!(details.take_stock("M", "Black", 1), Err(0));
        assert_eq!(details.take_stock("XL", "Red", 1), Err(0));
        assert_eq!(details.total_stock, 5);
        assert_eq!(
            details.total_stock,
            details.variants.iter().map(|v| v.stock).sum::<i32>()
        );
    }

    #[test]
    fn eligibility_matches_participant_type() {
        assert!(Eligibility::All.admits(ParticipantType::GroupB));
        assert!(Eligibility::GroupA.admits(ParticipantType::GroupA));
        assert!(!Eligibility::GroupA.admits(ParticipantType::GroupB));
    }

    #[test]
    fn views_carry_both_persisted_and_derived_status() {
        let event = Event {
            id: Uuid::new_v4(),
            organizer_id: Uuid::new_v4(),
            name: "Robot Derby".to_string(),
            description: String::new(),
            kind: EventKind::Ordinary,
            eligibility: Eligibility::All,
            tags: Vec::new(),
            registration_deadline: at(0),
            event_start_date: at(1),
            event_end_date: at(2),
            registration_limit: 0,
            registration_fee: Decimal::ZERO,
            status: EventStatus::Published,
            merchandise: None,
            custom_form: Vec::new(),
            created_at: at(-1),
            updated_at: at(-1),
        };

        let json = serde_json::to_value(EventView::at(event, at(3))).unwrap();
        assert_eq!(json["persistedStatus"], "PUBLISHED");
        assert_eq!(json["status"], "COMPLETED");
        assert!(json.get("registrationsCount").is_none());
    }
}
