//! Conference service error types.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl. Messages
//! for store, crypto and internal failures are replaced by generic text before
//! they reach clients; the actual error is logged server-side.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::CommonError;
use serde::Serialize;
use thiserror::Error;

/// Conference service error type.
///
/// Maps to HTTP status codes:
/// - NotFound: 404 Not Found
/// - Forbidden: 403 Forbidden
/// - Conflict: 409 Conflict
/// - ValidationFailed: 400 Bad Request
/// - CreationFailed, Database, Crypto, Internal: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum CsError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Creation failed: {0}")]
    CreationFailed(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CsError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            CsError::NotFound(_) => 404,
            CsError::Forbidden(_) => 403,
            CsError::Conflict(_) => 409,
            CsError::ValidationFailed(_) => 400,
            CsError::CreationFailed(_)
            | CsError::Database(_)
            | CsError::Crypto(_)
            | CsError::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code returned in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            CsError::NotFound(_) => "NOT_FOUND",
            CsError::Forbidden(_) => "FORBIDDEN",
            CsError::Conflict(_) => "CONFLICT",
            CsError::CreationFailed(_) => "CREATION_FAILED",
            CsError::ValidationFailed(_) => "VALIDATION_FAILED",
            CsError::Database(_) => "DATABASE_ERROR",
            CsError::Crypto(_) | CsError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for CsError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, message) = match &self {
            CsError::NotFound(resource) => (StatusCode::NOT_FOUND, resource.clone()),
            CsError::Forbidden(reason) => (StatusCode::FORBIDDEN, reason.clone()),
            CsError::Conflict(reason) => (StatusCode::CONFLICT, reason.clone()),
            CsError::ValidationFailed(reason) => (StatusCode::BAD_REQUEST, reason.clone()),
            CsError::CreationFailed(reason) => {
                tracing::error!(target: "cs.errors", reason = %reason, "Entity creation did not round-trip");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "The resource could not be created".to_string(),
                )
            }
            CsError::Database(err) => {
                tracing::error!(target: "cs.database", error = %err, "Database operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal database error occurred".to_string(),
                )
            }
            CsError::Crypto(err) | CsError::Internal(err) => {
                tracing::error!(target: "cs.errors", error = %err, "Internal failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(error_response)).into_response()
    }
}

/// Convert sqlx errors to CsError
impl From<sqlx::Error> for CsError {
    fn from(err: sqlx::Error) -> Self {
        CsError::Database(err.to_string())
    }
}

impl From<CommonError> for CsError {
    fn from(err: CommonError) -> Self {
        CsError::ValidationFailed(err.to_string())
    }
}

impl From<bcrypt::BcryptError> for CsError {
    fn from(err: bcrypt::BcryptError) -> Self {
        CsError::Crypto(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn read_body_json(body: Body) -> serde_json::Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_display_not_found() {
        let error = CsError::NotFound("conference".to_string());
        assert_eq!(format!("{}", error), "Not found: conference");
    }

    #[test]
    fn test_display_creation_failed() {
        let error = CsError::CreationFailed("id mismatch".to_string());
        assert_eq!(format!("{}", error), "Creation failed: id mismatch");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(CsError::NotFound("x".to_string()).status_code(), 404);
        assert_eq!(CsError::Forbidden("x".to_string()).status_code(), 403);
        assert_eq!(CsError::Conflict("x".to_string()).status_code(), 409);
        assert_eq!(CsError::ValidationFailed("x".to_string()).status_code(), 400);
        assert_eq!(CsError::CreationFailed("x".to_string()).status_code(), 500);
        assert_eq!(CsError::Database("x".to_string()).status_code(), 500);
        assert_eq!(CsError::Crypto("x".to_string()).status_code(), 500);
        assert_eq!(CsError::Internal("x".to_string()).status_code(), 500);
    }

    #[test]
    fn test_common_error_maps_to_validation() {
        let err: CsError = CommonError::InvalidIdentifier("bad".to_string()).into();
        assert!(matches!(err, CsError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn test_into_response_forbidden_keeps_reason() {
        let response = CsError::Forbidden("Only the author may delete".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "FORBIDDEN");
        assert_eq!(body_json["error"]["message"], "Only the author may delete");
    }

    #[tokio::test]
    async fn test_into_response_database_error_is_generic() {
        let response =
            CsError::Database("relation \"conferences\" does not exist".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "DATABASE_ERROR");
        assert_eq!(
            body_json["error"]["message"],
            "An internal database error occurred"
        );
    }

    #[tokio::test]
    async fn test_into_response_crypto_error_hides_details() {
        let response = CsError::Crypto("aead::Error at nonce 0x1f".to_string()).into_response();

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "INTERNAL_ERROR");
        assert!(!body_json["error"]["message"]
            .as_str()
            .unwrap()
            .contains("nonce"));
    }

    #[tokio::test]
    async fn test_into_response_validation_failed() {
        let response = CsError::ValidationFailed("No cameras selected".to_string()).into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body_json = read_body_json(response.into_body()).await;
        assert_eq!(body_json["error"]["code"], "VALIDATION_FAILED");
        assert_eq!(body_json["error"]["message"], "No cameras selected");
    }
}
