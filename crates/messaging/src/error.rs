//! Messaging error types.

use std::time::Duration;

use common::ErrorKind;
use event_store::EventStoreError;
use thiserror::Error;

/// Errors that can occur while producing or consuming messages.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// The broker rejected or failed a request.
    #[error("Broker error: {0}")]
    Broker(String),

    /// The broker did not acknowledge a send in time.
    #[error("Broker did not acknowledge within {0:?}")]
    AckTimeout(Duration),

    /// A send still failed after every retry.
    #[error("Publish to {topic} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        topic: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),
}

impl MessagingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MessagingError::EventStore(e) => e.kind(),
            _ => ErrorKind::Unknown,
        }
    }
}

/// Result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;
