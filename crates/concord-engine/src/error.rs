//! Error types for the settlement engine.

use concord_outcome::{ParseChoiceError, RulesError};
use concord_store::StoreError;
use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in engine operations.
///
/// Losing a race is never an error; see [`Finalization`](crate::Finalization)
/// and [`AwardOutcome`](crate::AwardOutcome).
#[derive(Debug, Error)]
pub enum Error {
    /// Store error (retryable when the store reports it so)
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Rejected at the boundary before any store mutation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<ParseChoiceError> for Error {
    fn from(e: ParseChoiceError) -> Self {
        Error::InvalidInput(e.to_string())
    }
}

impl From<RulesError> for Error {
    fn from(e: RulesError) -> Self {
        Error::Config(e.to_string())
    }
}
