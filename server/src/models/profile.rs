use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::text_enum;

text_enum! {
    pub enum ParticipantType {
        GroupA => "GROUP_A",
        GroupB => "GROUP_B",
    }
}

/// Read-only view of a participant, owned by the profile service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantProfile {
    pub user_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub contact_number: String,
    #[sqlx(try_from = "String")]
    pub participant_type: ParticipantType,
}

impl ParticipantProfile {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrganizerProfile {
    pub user_id: Uuid,
    pub organizer_name: String,
    pub contact_email: Option<String>,
    pub webhook_url: Option<String>,
}
