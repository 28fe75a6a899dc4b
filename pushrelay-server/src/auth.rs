//! Handshake authentication.
//!
//! Every WebSocket handshake carries `Authorization: Bearer <jwt>`. The token
//! is an HMAC-signed claim set; its `sub` claim names the connecting user.
//! Verification happens once, before the upgrade, and the decoded claims
//! travel with the request to the session layer.

use std::panic::{self, AssertUnwindSafe};

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Decoded token payload.
///
/// `sub` is kept as raw JSON: a token may carry a non-string subject, and
/// that is an admission failure rather than an authentication one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AuthClaims {
    /// The subject, if it is a JSON string.
    pub fn subject(&self) -> Option<&str> {
        self.sub.as_ref().and_then(|v| v.as_str())
    }
}

/// Verifies bearer tokens against the shared secret.
pub struct AuthGate {
    key: DecodingKey,
    validation: Validation,
}

impl AuthGate {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        // Expiry is checked when present; tokens without `exp` never expire.
        validation.required_spec_claims.clear();
        validation.validate_aud = false;
        validation.leeway = 0;
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Authenticate a handshake from its request headers.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<AuthClaims, AuthError> {
        let token = bearer_token(headers)?;
        self.verify(token)
    }

    /// Verify a raw token. Faults inside the decoder never escape as a panic.
    pub fn verify(&self, token: &str) -> Result<AuthClaims, AuthError> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            jsonwebtoken::decode::<AuthClaims>(token, &self.key, &self.validation)
        }));
        match outcome {
            Ok(Ok(data)) => Ok(data.claims),
            Ok(Err(e)) => Err(classify(e)),
            Err(_) => Err(AuthError::Internal(
                "token verification panicked".to_string(),
            )),
        }
    }
}

/// Pull the token out of `Authorization: <scheme> <token>`.
fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Err(AuthError::MissingToken);
    };
    let value = value
        .to_str()
        .map_err(|_| AuthError::InvalidToken("authorization header is not ASCII".to_string()))?;
    match value.split(' ').nth(1) {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(AuthError::MissingToken),
    }
}

fn classify(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        ErrorKind::InvalidToken
        | ErrorKind::InvalidSignature
        | ErrorKind::ExpiredSignature
        | ErrorKind::ImmatureSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::MissingRequiredClaim(_)
        | ErrorKind::InvalidIssuer
        | ErrorKind::InvalidAudience
        | ErrorKind::InvalidSubject
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => AuthError::InvalidToken(err.to_string()),
        _ => AuthError::Internal(err.to_string()),
    }
}
