//! Domain error types.

use common::ErrorKind;
use event_store::EventStoreError;
use thiserror::Error;

use crate::cart::CartError;
use crate::tenant_policy::TenantPolicyError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// The cart aggregate rejected a command.
    #[error("{0}")]
    Cart(#[from] CartError),

    /// The tenant policy aggregate rejected a command.
    #[error("{0}")]
    TenantPolicy(#[from] TenantPolicyError),
}

impl DomainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::EventStore(e) => e.kind(),
            DomainError::Cart(e) => e.kind(),
            DomainError::TenantPolicy(e) => e.kind(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DomainError>;
