//! Chat service error types.
//!
//! Session-local failures (`Connection`, `Protocol`) never leave the owning
//! session. `Publish` is returned to whichever code path asked for the publish.
//! `SubscriptionFatal` ends the instance's relay and is surfaced to `main`.
//!
//! HTTP-facing errors map to status codes via `IntoResponse`. Internal details
//! are logged server-side but not exposed to clients.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Chat service error type.
///
/// Maps to HTTP status codes:
/// - `InvalidToken`: 401 Unauthorized
/// - `Protocol`: 400 Bad Request
/// - `Redis`, `SubscriptionFatal`, `HubUnavailable`: 503 Service Unavailable
/// - `Publish` and everything else: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum ChatError {
    /// Transport read/write failure; terminates the owning session only.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed or unrecognized client frame.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Bus unreachable at publish time. Not retried.
    #[error("Publish error: {0}")]
    Publish(String),

    /// Bus subscription dropped. The relay for this instance is dead.
    #[error("Subscription lost: {0}")]
    SubscriptionFatal(String),

    /// Envelope could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Redis connection setup failed.
    #[error("Redis error: {0}")]
    Redis(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Auth collaborator rejected the token.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// The hub loop is no longer running.
    #[error("Hub unavailable")]
    HubUnavailable,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Reasons a client frame is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Frame was not valid JSON of the expected shape.
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// Frame parsed but its `type` is not a known command.
    #[error("Unknown command type: {0}")]
    UnknownType(String),

    /// Binary frame that is not UTF-8.
    #[error("Frame is not valid UTF-8")]
    NotUtf8,
}

impl ProtocolError {
    /// Bounded label for metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            ProtocolError::Malformed(_) => "malformed",
            ProtocolError::UnknownType(_) => "unknown_type",
            ProtocolError::NotUtf8 => "not_utf8",
        }
    }
}

impl ChatError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            ChatError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            ChatError::Protocol(_) => StatusCode::BAD_REQUEST,
            ChatError::Redis(_) | ChatError::SubscriptionFatal(_) | ChatError::HubUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ChatError::Publish(_)
            | ChatError::Connection(_)
            | ChatError::Serialization(_)
            | ChatError::Config(_)
            | ChatError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            ChatError::InvalidToken(_) => "The access token is invalid or expired".to_string(),
            ChatError::Protocol(e) => e.to_string(),
            ChatError::Publish(_) => "Failed to publish message".to_string(),
            ChatError::Redis(_) | ChatError::SubscriptionFatal(_) | ChatError::HubUnavailable => {
                "Realtime service temporarily unavailable".to_string()
            }
            ChatError::Connection(_)
            | ChatError::Serialization(_)
            | ChatError::Config(_)
            | ChatError::Internal(_) => "An internal error occurred".to_string(),
        }
    }

    const fn code(&self) -> &'static str {
        match self {
            ChatError::InvalidToken(_) => "INVALID_TOKEN",
            ChatError::Protocol(_) => "BAD_REQUEST",
            ChatError::Publish(_) => "PUBLISH_FAILED",
            ChatError::Redis(_) | ChatError::SubscriptionFatal(_) | ChatError::HubUnavailable => {
                "SERVICE_UNAVAILABLE"
            }
            ChatError::Connection(_)
            | ChatError::Serialization(_)
            | ChatError::Config(_)
            | ChatError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Serialization(err.to_string())
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

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(target: "chat.errors", error = %self, "Request failed");
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.client_message(),
            },
        };

        (status, Json(body)).into_response()
    }
}
