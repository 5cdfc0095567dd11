//! Engine operations. Handlers stay thin and call into these; each one
//! validates first and then performs a single atomic store call.

pub mod attendance;
pub mod events;
pub mod merchandise;
pub mod notify;
pub mod proofs;
pub mod registration;
pub mod reports;
