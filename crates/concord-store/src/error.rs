//! Error types for store operations.

use thiserror::Error;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in store operations.
///
/// A lost race is not an error: it surfaces as `false`, `None` or
/// [`Commit::Conflict`](crate::Commit::Conflict) from the operation itself.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not serve the request. Retryable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// `atomic_increment` on a key holding something other than an integer.
    #[error("Value at {key} is not an integer")]
    NotAnInteger { key: String },

    /// A stored value did not decode into its expected shape.
    #[error("Corrupt record at {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Io(_))
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}
