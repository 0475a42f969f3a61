//! Crate-wide error taxonomy.

use crate::admission::AdmissionError;
use crate::protocol::ProtocolError;
use crate::storage::StoreError;

/// Errors surfaced by the sync core and its HTTP surface.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Storage(StoreError),
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Request validation failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("`{0}` is required")]
    MissingField(&'static str),
    #[error("Image of {size} bytes exceeds the {limit} byte cap")]
    ImageTooLarge { size: u64, limit: u64 },
    #[error("Request body exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: u64 },
    #[error("Malformed upload: {0}")]
    MalformedUpload(String),
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { .. } => SyncError::NotFound(e.to_string()),
            StoreError::ImageTooLarge { size, limit } => {
                SyncError::Validation(ValidationError::ImageTooLarge { size, limit })
            }
            other => SyncError::Storage(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
