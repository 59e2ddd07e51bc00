//! Custom error types for the security service

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::error::{CacheError, DatabaseError};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Custom error type for the security service
#[derive(Error, Debug)]
pub enum SecurityError {
    /// Malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// A session operation targeted another user's session
    #[error("Authorization failed")]
    Authorization,

    /// The session or user does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Username or password did not match
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The session store could not be reached
    #[error("Session store error: {0}")]
    TransientStore(#[from] CacheError),

    /// The activity log or user directory could not be reached
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Internal server error
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Type alias for security service results
pub type SecurityResult<T> = Result<T, SecurityError>;

impl IntoResponse for SecurityError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            SecurityError::Validation(msg) => {
                debug!("Validation error: {}", msg);
                (StatusCode::BAD_REQUEST, msg)
            }
            SecurityError::Authorization => {
                warn!("Cross-user session operation rejected");
                (StatusCode::FORBIDDEN, "Forbidden".to_string())
            }
            SecurityError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            SecurityError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "Invalid username or password".to_string(),
            ),
            SecurityError::TransientStore(e) => {
                error!("Session store error: {}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Session store unavailable".to_string(),
                )
            }
            SecurityError::Database(e) => {
                error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                )
            }
            SecurityError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (SecurityError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (SecurityError::Authorization, StatusCode::FORBIDDEN),
            (SecurityError::NotFound("gone".into()), StatusCode::NOT_FOUND),
            (SecurityError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (
                SecurityError::TransientStore(CacheError::Unavailable("down".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }
}
