use gradeportal_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}
