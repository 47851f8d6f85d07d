use serde::Serialize;

/// Coarse classification shared by every error type in the workspace.
///
/// Callers branch on the kind rather than on concrete variants: the command
/// handler retries only [`ErrorKind::OptimisticLock`], and the HTTP layer maps
/// kinds to status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Missing aggregate or view. Often just "not created yet".
    NotFound,
    /// Bad command input.
    InvalidParameter,
    /// The command violates the aggregate's state machine.
    UnpermittedOp,
    /// A concurrent writer advanced the aggregate first.
    OptimisticLock,
    /// Store write failure.
    Repository,
    /// Store read failure.
    Query,
    /// Transport or serialization failure.
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::InvalidParameter => "INVALID_PARAMETER",
            ErrorKind::UnpermittedOp => "UNPERMITTED_OP",
            ErrorKind::OptimisticLock => "OPTIMISTIC_LOCK",
            ErrorKind::Repository => "REPOSITORY",
            ErrorKind::Query => "QUERY",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }

    /// Returns true if the operation may succeed when simply run again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::OptimisticLock)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
