//! Error taxonomy for the relay.
//!
//! Each failure is resolved at the boundary where it happens: handshake
//! failures never reach the registry, validation failures never reach a
//! lookup. [`RelayError`] maps every kind onto an HTTP response.

use std::net::IpAddr;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

/// Credential check failures during the WebSocket handshake.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Authentication error: No token provided.")]
    MissingToken,
    #[error("Authentication error: Invalid token")]
    InvalidToken(String),
    #[error("Authentication processing failed due to server error")]
    Internal(String),
}

/// Malformed input from a client or a push caller.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Required parameters missing: {}", .0.join(", "))]
    MissingField(Vec<&'static str>),
    #[error("Invalid userId provided")]
    InvalidUserId,
    #[error("Request body must be a JSON object")]
    MalformedBody,
}

/// Admission conflicts between two sessions for the same user.
#[derive(Debug, thiserror::Error)]
pub enum SessionConflict {
    #[error("Already connected from another device")]
    AlreadyConnected,
    /// Admission was attempted on a session that already went through it.
    #[error("Session has already been admitted or closed")]
    AlreadyAdmitted,
}

/// Startup configuration problems. The process does not come up.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("JWT_SECRET is not set; refusing to start")]
    MissingSecret,
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Conflict(#[from] SessionConflict),
    #[error("User is not currently connected")]
    NotConnected,
    #[error("Access denied: IP address not allowed")]
    AccessDenied(IpAddr),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotConnected => StatusCode::NOT_FOUND,
            Self::AccessDenied(_) => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let body = match &self {
            // Auth and IP rejections carry only a message, like the
            // handshake rejection the client library expects.
            Self::Auth(_) | Self::AccessDenied(_) => serde_json::json!({
                "message": self.to_string(),
            }),
            _ => serde_json::json!({
                "success": false,
                "message": self.to_string(),
            }),
        };
        (self.status(), Json(body)).into_response()
    }
}
