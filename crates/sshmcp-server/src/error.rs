use axum::{Json, http::StatusCode, response::IntoResponse};
use serde_json::json;

use crate::auth::CredentialChannel;

/// JSON-RPC "internal error".
pub const INTERNAL_ERROR: i64 = -32603;
/// Implementation-defined server error, used for auth and session failures.
pub const SERVER_ERROR: i64 = -32000;

/// Failures raised in front of the MCP service, rendered as JSON-RPC error
/// envelopes with `id: null`.
#[derive(Debug)]
pub enum AppError {
    /// No shared secret configured.
    Misconfigured,
    MissingCredential,
    InvalidCredential(CredentialChannel),
    /// The presented session id is unknown, expired or closed.
    InvalidSession,
}

impl AppError {
    const fn status(&self) -> StatusCode {
        match self {
            Self::Misconfigured => StatusCode::INTERNAL_SERVER_ERROR,
            Self::MissingCredential => StatusCode::UNAUTHORIZED,
            Self::InvalidCredential(_) => StatusCode::FORBIDDEN,
            Self::InvalidSession => StatusCode::BAD_REQUEST,
        }
    }

    const fn code(&self) -> i64 {
        match self {
            Self::Misconfigured => INTERNAL_ERROR,
            _ => SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Misconfigured => write!(f, "Server configuration error"),
            Self::MissingCredential => write!(
                f,
                "Unauthorized: provide a bearer token in the Authorization header or the token query parameter"
            ),
            Self::InvalidCredential(channel) => {
                write!(f, "Forbidden: invalid bearer token in {channel}")
            }
            Self::InvalidSession => write!(f, "Invalid session"),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        if matches!(self, Self::Misconfigured) {
            tracing::error!("BEARER_TOKEN is not configured; rejecting request");
        }
        let envelope = json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": { "code": self.code(), "message": self.to_string() },
        });
        (self.status(), Json(envelope)).into_response()
    }
}
