use thiserror::Error;

#[derive(Debug, Error)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Declares an enum persisted and transmitted as a fixed upper-case string.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ::serde::Serialize, ::serde::Deserialize)]
        $vis enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::models::UnknownVariant;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok(Self::$variant),)+
                    other => Err($crate::models::UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = $crate::models::UnknownVariant;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    };
}

pub(crate) use text_enum;

pub mod event;
pub mod profile;
pub mod registration;
pub mod ticket;

pub use event::{
    display_status, Eligibility, Event, EventKind, EventStatus, EventView, FormField,
    FormFieldType, MerchandiseDetails, Variant,
};
pub use profile::{OrganizerProfile, ParticipantProfile, ParticipantType};
pub use registration::{
    AdmissionStatus, AttendanceChange, AttendanceCheck, AuditAction, AuditEntry, AuditLog,
    MerchandisePurchase, Order, OrderStatus, PaymentStatus, Registration, RegistrationState,
    RegistrationStatus, Ticket,
};
pub use ticket::{IssuedTicket, TicketPayload};
