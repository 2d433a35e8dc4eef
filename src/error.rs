// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for fleetgate.
//!
//! Every privileged operation terminates in either a definitive success
//! response or one of these errors. Guarded transitions that change zero
//! rows are not errors: handlers report them as success with an
//! `already_processed` flag so duplicate admin actions stay safe.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Result type using fleetgate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Control-plane errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A required field is missing or malformed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The request carried no credential or an invalid one.
    #[error("Unauthorized: {0}")]
    Auth(String),

    /// Authenticated but not permitted to perform the operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The targeted entity does not exist.
    #[error("{entity} '{id}' not found")]
    NotFound {
        /// Entity kind (profile, booking, ...).
        entity: &'static str,
        /// Identifier that failed to resolve.
        id: String,
    },

    /// The `action` tag did not name a known operation.
    #[error("Unknown action '{0}'")]
    UnknownAction(String),

    /// The caller exceeded its request budget for the current window.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// The backing store rejected a read or write.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Push gateway or token exchange failed.
    #[error("Push gateway error: {0}")]
    Push(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// HTTP status this error maps to on the admin surface.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::UnknownAction(_) | Self::Json(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Config(_) | Self::Database(_) | Self::Push(_) | Self::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases: Vec<(Error, StatusCode)> = vec![
            (
                Error::Validation("amount is required".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                Error::UnknownAction("not_a_real_action".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                Error::Auth("missing bearer token".into()),
                StatusCode::UNAUTHORIZED,
            ),
            (
                Error::Forbidden("admin role required".into()),
                StatusCode::FORBIDDEN,
            ),
            (
                Error::NotFound {
                    entity: "booking",
                    id: "bk-1".into(),
                },
                StatusCode::NOT_FOUND,
            ),
            (Error::RateLimited, StatusCode::TOO_MANY_REQUESTS),
            (
                Error::Other("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.status_code(), expected, "{error:?}");
        }
    }

    #[test]
    fn test_display_messages() {
        let err = Error::UnknownAction("not_a_real_action".to_string());
        assert_eq!(err.to_string(), "Unknown action 'not_a_real_action'");

        let err = Error::NotFound {
            entity: "profile",
            id: "u-9".to_string(),
        };
        assert_eq!(err.to_string(), "profile 'u-9' not found");
    }
}
