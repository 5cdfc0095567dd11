//! Shared resources handed to every handler.

use std::sync::Arc;

use crate::services::notify::Notifier;
use crate::services::proofs::ProofStore;
use crate::store::Store;
use crate::utils::clock::Clock;

/// Cloned per request; every field is an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn Notifier>,
    pub proofs: Arc<dyn ProofStore>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        proofs: Arc<dyn ProofStore>,
    ) -> Self {
        Self {
            store,
            clock,
            notifier,
            proofs,
        }
    }
}
