use common::ErrorKind;
use thiserror::Error;

use crate::{AggregateId, EventId, Version};

/// Errors that can occur when interacting with the event store or outbox.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// Another writer appended to the aggregate after it was loaded.
    #[error(
        "Optimistic lock failure for aggregate {aggregate_id}: expected version {expected}, found {actual}"
    )]
    OptimisticLock {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// The aggregate has no stored history.
    #[error("Aggregate not found: {aggregate_type} {aggregate_id}")]
    NotFound {
        aggregate_type: String,
        aggregate_id: AggregateId,
    },

    /// No outbox record exists for the event.
    #[error("Outbox record not found for event {0}")]
    OutboxRecordNotFound(EventId),

    /// The payload carries a type tag nobody registered a decoder for.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// The events handed to `save_events` are malformed.
    #[error("Invalid append: {0}")]
    InvalidAppend(String),

    /// An envelope is missing a required field.
    #[error("Incomplete event envelope: missing {0}")]
    IncompleteEnvelope(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventStoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EventStoreError::OptimisticLock { .. } => ErrorKind::OptimisticLock,
            EventStoreError::NotFound { .. } | EventStoreError::OutboxRecordNotFound(_) => {
                ErrorKind::NotFound
            }
            EventStoreError::InvalidAppend(_) | EventStoreError::IncompleteEnvelope(_) => {
                ErrorKind::InvalidParameter
            }
            EventStoreError::Database(sqlx::Error::RowNotFound) => ErrorKind::Query,
            EventStoreError::Database(_) | EventStoreError::Migration(_) => ErrorKind::Repository,
            EventStoreError::UnknownEventType(_) | EventStoreError::Serialization(_) => {
                ErrorKind::Unknown
            }
        }
    }

    /// Returns true for the "no history yet" signal callers treat as a fresh aggregate.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EventStoreError::NotFound { .. })
    }
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
