use confab_core::GatewayError;
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid content: {0}")]
    InvalidContent(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<StorageError> for GatewayError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidKey(msg) | StorageError::InvalidContent(msg) => {
                GatewayError::Validation(msg)
            }
            StorageError::AccessDenied(msg) => GatewayError::Auth(msg),
            other => GatewayError::upstream("object-store", other.to_string()),
        }
    }
}
