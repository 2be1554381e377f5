// =============================================================================
// Admin Token Authentication
// =============================================================================
//
// Every settings endpoint takes `Authorization: Bearer <token>`; the WebSocket
// feed takes `?token=<token>` since browsers cannot set headers on upgrade.
// Both are checked against `SENTINEL_ADMIN_TOKEN`, re-read per request so a
// rotated token applies without restart.  An unset or empty variable locks
// the API rather than opening it.
// =============================================================================

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::warn;

/// Environment variable holding the admin token.
pub const ADMIN_TOKEN_ENV: &str = "SENTINEL_ADMIN_TOKEN";

/// Byte-wise equality whose running time does not depend on where the first
/// mismatch is.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn configured_token() -> Option<String> {
    std::env::var(ADMIN_TOKEN_ENV).ok().filter(|t| !t.is_empty())
}

/// The token part of a well-formed `Authorization: Bearer` header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Why a request was turned away.  All variants answer 403.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    NotConfigured,
    MissingToken,
    WrongToken,
}

impl AuthError {
    fn message(self) -> &'static str {
        match self {
            Self::NotConfigured => "server authentication not configured",
            Self::MissingToken => "missing or malformed authorization header",
            Self::WrongToken => "invalid authorization token",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message() });
        (StatusCode::FORBIDDEN, Json(body)).into_response()
    }
}

/// Check a presented token against the configured one.
fn authorize(presented: Option<&str>) -> Result<(), AuthError> {
    let expected = configured_token().ok_or(AuthError::NotConfigured)?;
    let presented = presented.ok_or(AuthError::MissingToken)?;
    if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(AuthError::WrongToken)
    }
}

/// Extractor guarding a handler; yields nothing useful beyond its presence.
pub struct AuthBearer;

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthBearer
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        authorize(bearer_token(&parts.headers))
            .map(|()| AuthBearer)
            .map_err(|e| {
                warn!(path = %parts.uri.path(), reason = e.message(), "API request rejected");
                e
            })
    }
}

/// Query-string variant used by the WebSocket upgrade.
pub fn validate_token(token: &str) -> bool {
    let presented = Some(token).filter(|t| !t.is_empty());
    match authorize(presented) {
        Ok(()) => true,
        Err(e) => {
            warn!(reason = e.message(), "WebSocket token rejected");
            false
        }
    }
}
