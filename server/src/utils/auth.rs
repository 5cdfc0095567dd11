//! Caller identity, as asserted by the upstream gateway.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use uuid::Uuid;

use crate::utils::error::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const USER_DISABLED_HEADER: &str = "x-user-disabled";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Participant,
    Organizer,
    Admin,
}

impl Role {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "participant" => Some(Role::Participant),
            "organizer" => Some(Role::Organizer),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: Role,
    pub disabled: bool,
}

impl Principal {
    pub fn participant(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::Participant,
            disabled: false,
        }
    }

    pub fn organizer(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::Organizer,
            disabled: false,
        }
    }

    pub fn require_participant(&self) -> Result<Uuid, AppError> {
        if self.role != Role::Participant {
            return Err(AppError::Forbidden(
                "Only participants can perform this action".to_string(),
            ));
        }
        Ok(self.user_id)
    }

    /// Organizer routes also turn away disabled accounts.
    pub fn require_organizer(&self) -> Result<Uuid, AppError> {
        if self.disabled {
            return Err(AppError::Forbidden("Account is disabled".to_string()));
        }
        if self.role != Role::Organizer {
            return Err(AppError::Forbidden("Only organizers allowed".to_string()));
        }
        Ok(self.user_id)
    }

    fn from_headers(headers: &HeaderMap) -> Result<Self, AppError> {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        let user_id = header(USER_ID_HEADER)
            .ok_or_else(|| AppError::AuthError("Missing caller identity".to_string()))?
            .parse::<Uuid>()
            .map_err(|_| AppError::AuthError("Malformed caller identity".to_string()))?;
        let role = header(USER_ROLE_HEADER)
            .and_then(Role::parse)
            .ok_or_else(|| AppError::AuthError("Missing or unknown caller role".to_string()))?;
        let disabled = header(USER_DISABLED_HEADER)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));

        Ok(Self {
            user_id,
            role,
            disabled,
        })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Principal::from_headers(&parts.headers)
    }
}
