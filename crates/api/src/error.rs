//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::ErrorKind;
use domain::DomainError;
use projections::ProjectionError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// A command or load failed in the domain layer.
    Domain(DomainError),
    /// A read model query failed.
    Projection(ProjectionError),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::NotFound(_) => ErrorKind::NotFound,
            ApiError::Domain(err) => err.kind(),
            ApiError::Projection(err) => err.kind(),
        }
    }
}

/// Status code for an error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidParameter => StatusCode::BAD_REQUEST,
        ErrorKind::UnpermittedOp | ErrorKind::OptimisticLock => StatusCode::CONFLICT,
        ErrorKind::Repository | ErrorKind::Query | ErrorKind::Unknown => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::NotFound(msg) => f.write_str(msg),
            ApiError::Domain(err) => write!(f, "{err}"),
            ApiError::Projection(err) => write!(f, "{err}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.kind());
        let message = self.to_string();
        if status.is_server_error() {
            tracing::error!(error = %message, kind = %self.kind(), "internal server error");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<ProjectionError> for ApiError {
    fn from(err: ProjectionError) -> Self {
        ApiError::Projection(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{CartError, TenantPolicyError};
    use event_store::EventStoreError;

    #[test]
    fn test_kind_to_status() {
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::InvalidParameter), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::UnpermittedOp), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::OptimisticLock), StatusCode::CONFLICT);
        assert_eq!(
            status_for(ErrorKind::Query),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_domain_errors_map_through_kind() {
        let closed = ApiError::from(DomainError::from(CartError::AlreadyPurchased));
        assert_eq!(closed.into_response().status(), StatusCode::CONFLICT);

        let price = ApiError::from(DomainError::from(CartError::NegativePrice));
        assert_eq!(price.into_response().status(), StatusCode::BAD_REQUEST);

        let missing = ApiError::from(DomainError::from(TenantPolicyError::NotCreated));
        assert_eq!(missing.into_response().status(), StatusCode::CONFLICT);

        let io = ApiError::from(DomainError::from(EventStoreError::Database(
            sqlx::Error::PoolTimedOut,
        )));
        assert_eq!(io.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_not_found() {
        let err = ApiError::NotFound("cart not found".to_string());
        assert_eq!(err.to_string(), "cart not found");
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }
}
