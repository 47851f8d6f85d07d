//! Identifiers and error classification shared across the workspace.

pub mod error;
pub mod types;

pub use error::ErrorKind;
pub use types::AggregateId;
