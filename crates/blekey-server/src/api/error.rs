//! API error types and response handling.
//!
//! This module provides a unified error type for all API handlers
//! with automatic conversion to appropriate HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use blekey_core::KeyManagerError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
///
/// Each variant maps to a specific HTTP status code and produces a
/// consistent JSON error response.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// 400 Bad Request - Invalid input from client.
    BadRequest {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 404 Not Found - Resource does not exist.
    NotFound {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 409 Conflict - The address is already registered.
    Conflict {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 500 Internal Server Error - Unexpected server-side error.
    InternalError {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional details (not exposed to client in production).
        details: Option<String>,
    },

    /// 503 Service Unavailable - The radio or the manager task is unavailable.
    ServiceUnavailable {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional additional details.
        details: Option<String>,
    },
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "invalid_argument",
    "message": "Invalid argument: Invalid MAC address format: AA:BB",
    "details": null
}))]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "duplicate_address").
    #[schema(example = "invalid_argument")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "Invalid argument: Invalid MAC address format: AA:BB")]
    pub message: String,

    /// Optional additional details for debugging.
    #[schema(nullable)]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            Self::BadRequest { error_code, message } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),

            Self::NotFound { error_code, message } => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),

            Self::Conflict { error_code, message } => (
                StatusCode::CONFLICT,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),

            Self::InternalError {
                error_code,
                message,
                details,
            } => {
                tracing::error!(
                    error_code = %error_code,
                    message = %message,
                    details = ?details,
                    "Internal server error"
                );

                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse {
                        error: error_code,
                        message,
                        details: details.map(|d| serde_json::json!(d)),
                    },
                )
            }

            Self::ServiceUnavailable {
                error_code,
                message,
                details,
            } => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: details.map(|d| serde_json::json!(d)),
                },
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest { message, .. } => write!(f, "Bad Request: {message}"),
            Self::NotFound { message, .. } => write!(f, "Not Found: {message}"),
            Self::Conflict { message, .. } => write!(f, "Conflict: {message}"),
            Self::InternalError { message, .. } => write!(f, "Internal Error: {message}"),
            Self::ServiceUnavailable { message, .. } => {
                write!(f, "Service Unavailable: {message}")
            }
        }
    }
}

impl std::error::Error for ApiError {}

/// Convert from blekey_core errors.
impl From<KeyManagerError> for ApiError {
    fn from(err: KeyManagerError) -> Self {
        let error_code = err.error_code().to_lowercase();
        let message = err.to_string();

        match err {
            KeyManagerError::InvalidArgument(_) => Self::BadRequest {
                error_code,
                message,
            },
            KeyManagerError::NotFound(_) => Self::NotFound {
                error_code,
                message,
            },
            KeyManagerError::DuplicateAddress(_) => Self::Conflict {
                error_code,
                message,
            },
            KeyManagerError::PersistenceFailure(_) | KeyManagerError::Config(_) => {
                Self::InternalError {
                    error_code,
                    message,
                    details: None,
                }
            }
            KeyManagerError::RadioUnavailable(reason) => Self::ServiceUnavailable {
                error_code,
                message,
                details: Some(reason),
            },
            KeyManagerError::ManagerStopped => Self::ServiceUnavailable {
                error_code,
                message,
                details: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blekey_core::MacAddress;

    #[test]
    fn test_bad_request_error() {
        let err = ApiError::BadRequest {
            error_code: "test_error".to_string(),
            message: "Test message".to_string(),
        };
        assert!(err.to_string().contains("Bad Request"));
    }

    #[test]
    fn test_core_errors_map_to_status_codes() {
        let address = MacAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        let cases = [
            (KeyManagerError::InvalidArgument("x".into()), StatusCode::BAD_REQUEST),
            (KeyManagerError::NotFound(address), StatusCode::NOT_FOUND),
            (KeyManagerError::DuplicateAddress(address), StatusCode::CONFLICT),
            (KeyManagerError::ManagerStopped, StatusCode::SERVICE_UNAVAILABLE),
        ];

        for (err, status) in cases {
            assert_eq!(err.http_status_code(), status.as_u16());
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), status);
        }
    }

    #[test]
    fn test_error_code_is_lowercase() {
        let address = MacAddress::new([1, 2, 3, 4, 5, 6]);
        match ApiError::from(KeyManagerError::DuplicateAddress(address)) {
            ApiError::Conflict { error_code, .. } => assert_eq!(error_code, "duplicate_address"),
            other => panic!("unexpected mapping: {other}"),
        }
    }
}
