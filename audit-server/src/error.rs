//! Error types for the audit server.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use policy_audit::AuditError;
use serde::Serialize;
use thiserror::Error;

/// Result type alias for the server.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors that can occur in the audit server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Failure raised by the audit pipeline.
    #[error(transparent)]
    Audit(#[from] AuditError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Server startup error.
    #[error("Server error: {0}")]
    Server(String),
}

/// Error response body for HTTP endpoints.
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match self {
            // Validation failures go back as the bare reason in plain text.
            Self::Audit(e @ (AuditError::MissingApiKey | AuditError::MissingUrl)) => {
                return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
            }
            // The upstream payload is passed through untouched.
            Self::Audit(AuditError::UpstreamCatalog(payload)) => {
                return (StatusCode::INTERNAL_SERVER_ERROR, Json(payload)).into_response();
            }
            Self::Audit(e @ AuditError::InvalidUrl { .. }) => (
                StatusCode::BAD_REQUEST,
                "INVALID_URL",
                "The Okta URL could not be resolved".to_string(),
                Some(e.to_string()),
            ),
            Self::Audit(
                e @ (AuditError::HttpError(_) | AuditError::DecodeError(_) | AuditError::Timeout(_)),
            ) => {
                tracing::error!(error = %e, "Okta catalog request failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "UPSTREAM_ERROR",
                    "The Okta API could not be reached".to_string(),
                    Some(e.to_string()),
                )
            }
            Self::Audit(AuditError::ConfigError(msg)) | Self::Configuration(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIGURATION_ERROR",
                msg,
                None,
            ),
            Self::Server(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERVER_ERROR",
                msg,
                None,
            ),
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}
