//! Storage error types.

use studio_access::AccessError;
use thiserror::Error;

/// Storage result type.
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Object not found.
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Key is not a plain object name.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl StorageError {
    /// Returns true for missing objects.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<StorageError> for AccessError {
    fn from(err: StorageError) -> Self {
        AccessError::Storage(err.to_string())
    }
}
