//! Saga error types.

use common::ErrorKind;
use domain::DomainError;
use event_store::EventStoreError;
use messaging::MessagingError;
use thiserror::Error;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Domain error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Event store error.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    /// Delay queue storage failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A delay too large to be added to the current time.
    #[error("Delay out of range: {0:?}")]
    DelayOutOfRange(std::time::Duration),
}

impl SagaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SagaError::Domain(e) => e.kind(),
            SagaError::EventStore(e) => e.kind(),
            SagaError::Messaging(e) => e.kind(),
            SagaError::Database(_) => ErrorKind::Repository,
            SagaError::Serialization(_) => ErrorKind::Unknown,
            SagaError::DelayOutOfRange(_) => ErrorKind::InvalidParameter,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
