//! Projection error types.

use common::{AggregateId, ErrorKind};
use thiserror::Error;

/// Errors that can occur during projection processing.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    /// A view store query failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Failed to (de)serialize a view column or payload.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An event skipped past the next version of its aggregate's view.
    #[error("Out of order event for {aggregate_id}: expected version {expected}, got {got}")]
    OutOfOrder {
        aggregate_id: AggregateId,
        expected: i64,
        got: i64,
    },
}

impl ProjectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProjectionError::EventStore(e) => e.kind(),
            ProjectionError::Database(_) => ErrorKind::Repository,
            ProjectionError::Serialization(_) => ErrorKind::Unknown,
            ProjectionError::OutOfOrder { .. } => ErrorKind::Unknown,
        }
    }
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
