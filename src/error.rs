// SPDX-License-Identifier: MIT

//! Application error types with consistent API responses.
//!
//! Provider and network failures are translated into this taxonomy at the
//! service boundary; raw Fitbit error bodies are logged server-side only.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid or expired session token")]
    InvalidToken,

    #[error("No Fitbit connection for this user")]
    NotConnected,

    #[error("Fitbit authorization denied: {0}")]
    OAuthDenied(String),

    #[error("Invalid or expired OAuth state")]
    InvalidState,

    #[error("Fitbit refresh token rejected, reconnect required")]
    RefreshTokenInvalid,

    #[error("Fitbit rate limit exceeded")]
    RateLimited,

    #[error("Fitbit {endpoint} endpoint returned HTTP {status}")]
    Upstream { endpoint: &'static str, status: u16 },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Server configuration error: {0}")]
    Configuration(&'static str),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Whether a retry with backoff could succeed.
    ///
    /// Rate limits recover on the next poll cycle and transient upstream
    /// failures may clear; everything else needs caller action first.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::RateLimited | AppError::Upstream { .. } | AppError::Database(_)
        )
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token", None),
            AppError::NotConnected => (StatusCode::BAD_REQUEST, "not_connected", None),
            AppError::OAuthDenied(reason) => (
                StatusCode::BAD_REQUEST,
                "oauth_denied",
                Some(reason.clone()),
            ),
            AppError::InvalidState => (StatusCode::BAD_REQUEST, "invalid_state", None),
            AppError::RefreshTokenInvalid => {
                (StatusCode::BAD_REQUEST, "reconnect_required", None)
            }
            AppError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate_limited", None),
            AppError::Upstream { endpoint, status } => (
                StatusCode::BAD_GATEWAY,
                "fitbit_error",
                Some(format!("{} endpoint returned HTTP {}", endpoint, status)),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::Configuration(name) => {
                tracing::error!(missing = %name, "Server configuration error");
                (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error", None)
            }
            AppError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
