//! Per-tenant cart abandonment policy aggregate.

mod aggregate;
mod commands;
mod events;
mod service;

pub use aggregate::{QuietWindow, TenantPolicy, hhmm, parse_time_of_day};
pub use commands::*;
pub use events::{
    POLICY_CREATED, POLICY_UPDATED, TenantPolicyCreated, TenantPolicyEvent, TenantPolicyUpdated,
};
pub use service::TenantPolicyService;

use common::ErrorKind;
use thiserror::Error;

/// Errors that can occur during tenant policy operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TenantPolicyError {
    #[error("tenant policy already exists")]
    AlreadyExists,

    #[error("tenant policy not created")]
    NotCreated,

    #[error("abandoned minutes must be greater than 0")]
    InvalidMinutes,

    /// A quiet-hours bound that is not `HH:MM`.
    #[error("invalid time of day: {0}")]
    InvalidTimeOfDay(String),
}

impl TenantPolicyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TenantPolicyError::AlreadyExists | TenantPolicyError::NotCreated => {
                ErrorKind::UnpermittedOp
            }
            TenantPolicyError::InvalidMinutes | TenantPolicyError::InvalidTimeOfDay(_) => {
                ErrorKind::InvalidParameter
            }
        }
    }
}
