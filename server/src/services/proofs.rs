use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

use crate::utils::error::AppError;

pub const MAX_PROOF_BYTES: usize = 5 * 1024 * 1024;
const ALLOWED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
const PUBLIC_PREFIX: &str = "/uploads/payments/";

/// Keeps payment-proof images and hands back the reference stored on the order.
#[async_trait]
pub trait ProofStore: Send + Sync {
    async fn save(&self, filename: &str, bytes: &[u8]) -> Result<String, AppError>;

    /// Deletes a saved proof that ended up attached to nothing. Unknown references are ignored.
    async fn discard(&self, reference: &str) -> Result<(), AppError>;
}

/// Lower-cased extension of an acceptable proof image.
pub fn proof_extension(filename: &str, len: usize) -> Result<String, AppError> {
    if len == 0 {
        return Err(AppError::ValidationError(
            "Payment proof image is required".to_string(),
        ));
    }
    if len > MAX_PROOF_BYTES {
        return Err(AppError::ValidationError(
            "Payment proof image must be at most 5MB".to_string(),
        ));
    }
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .filter(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
        .ok_or_else(|| AppError::ValidationError("Only JPG and PNG images are allowed".to_string()))
}

pub struct LocalProofStore {
    root: PathBuf,
}

impl LocalProofStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ProofStore for LocalProofStore {
    async fn save(&self, filename: &str, bytes: &[u8]) -> Result<String, AppError> {
        let ext = proof_extension(filename, bytes.len())?;
        let dir = self.root.join("payments");
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| AppError::ExternalServiceError(format!("proof storage: {e}")))?;

        let stored = format!("{}.{ext}", Uuid::new_v4());
        tokio::fs::write(dir.join(&stored), bytes)
            .await
            .map_err(|e| AppError::ExternalServiceError(format!("proof storage: {e}")))?;

        info!(file = %stored, size = bytes.len(), "Stored payment proof");
        Ok(format!("{PUBLIC_PREFIX}{stored}"))
    }

    async fn discard(&self, reference: &str) -> Result<(), AppError> {
        let Some(stored) = reference
            .strip_prefix(PUBLIC_PREFIX)
            .filter(|name| !name.is_empty() && !name.contains(['/', '\\']) && *name != "..")
        else {
            return Ok(());
        };
        match tokio::fs::remove_file(self.root.join("payments").join(stored)).await {
            Ok(()) => {
                info!(file = %stored, "Discarded payment proof");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::ExternalServiceError(format!("proof storage: {e}"))),
        }
    }
}
