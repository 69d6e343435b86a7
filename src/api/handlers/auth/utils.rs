//! Small helpers shared by the auth handlers.

use axum::http::{header::USER_AGENT, HeaderMap};
use std::fmt::Display;
use tracing::error;

use crate::error::AuthError;

pub(super) const BEARER: &str = "Bearer";

pub(super) fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Log the cause and hand back the generic 503.
pub(super) fn unavailable(context: &str, err: impl Display) -> AuthError {
    error!("{context}: {err}");
    AuthError::Unavailable
}

/// Whole seconds left until `exp`, never negative.
pub(super) fn seconds_until(exp: i64, now: i64) -> std::time::Duration {
    std::time::Duration::from_secs(u64::try_from(exp.saturating_sub(now)).unwrap_or(0))
}
