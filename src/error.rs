//! Request-facing failure taxonomy.
//!
//! Every variant maps to a stable status code and a generic message. The
//! diagnostic cause is logged where the failure is produced and never echoed
//! back to the client.

use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("authorization header is not a bearer credential")]
    InvalidAuthHeader,
    #[error("token signature or shape is invalid")]
    InvalidTokenFormat,
    #[error("token has expired")]
    ExpiredToken,
    #[error("token claims do not match the session record")]
    ClaimMismatch,
    #[error("session not found")]
    SessionNotFound,
    #[error("tenant is not allowed")]
    TenantNotAllowed,
    #[error("rate limited for {retry_after:?}")]
    RateLimited { retry_after: Duration },
    #[error("blocked for {retry_after:?}")]
    Blocked { retry_after: Duration },
    #[error("two-factor verification required")]
    TwoFactorRequired,
    #[error("two-factor code rejected")]
    TwoFactorInvalid,
    #[error("session has not completed two-factor verification")]
    TwoFactorUnverified,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("csrf token rejected")]
    CsrfRejected,
    #[error("a required dependency is unavailable")]
    Unavailable,
}

impl AuthError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::MissingToken
            | Self::InvalidAuthHeader
            | Self::InvalidTokenFormat
            | Self::ExpiredToken
            | Self::ClaimMismatch
            | Self::SessionNotFound
            | Self::TwoFactorInvalid
            | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::TenantNotAllowed | Self::CsrfRejected | Self::TwoFactorUnverified => {
                StatusCode::FORBIDDEN
            }
            Self::RateLimited { .. } | Self::Blocked { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::TwoFactorRequired => StatusCode::ACCEPTED,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Stable message returned to clients.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::MissingToken => "Unauthorized - Missing token",
            Self::InvalidAuthHeader => "Unauthorized - Invalid authorization header",
            Self::InvalidTokenFormat => "Unauthorized - Invalid token format",
            Self::ExpiredToken => "Unauthorized - Invalid or expired token",
            Self::ClaimMismatch => "Unauthorized - Token mismatch",
            Self::SessionNotFound => "Unauthorized - Session not found",
            Self::TenantNotAllowed => "Forbidden - Tenant is not allowed",
            Self::RateLimited { .. } => "Too many requests. Please slow down.",
            Self::Blocked { .. } => "Too many attempts. Please try again later.",
            Self::TwoFactorRequired => "Two-factor verification required",
            Self::TwoFactorInvalid => "Invalid two-factor code",
            Self::TwoFactorUnverified => "Forbidden - 2FA verification required",
            Self::InvalidCredentials => "Invalid credentials",
            Self::CsrfRejected => "Forbidden - Invalid CSRF token",
            Self::Unavailable => "Service temporarily unavailable",
        }
    }

    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } | Self::Blocked { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Whole seconds for a `Retry-After` header, never below one.
fn retry_after_seconds(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = match self.retry_after() {
            Some(wait) => json!({
                "error": self.message(),
                "retry_after": retry_after_seconds(wait),
            }),
            None => json!({ "error": self.message() }),
        };

        let mut response = (self.status(), Json(body)).into_response();

        if let Some(wait) = self.retry_after() {
            if let Ok(value) = HeaderValue::from_str(&retry_after_seconds(wait).to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }

        response
    }
}
