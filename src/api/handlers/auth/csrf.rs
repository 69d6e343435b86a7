//! CSRF tokens for state-changing requests.
//!
//! Tokens are random, live in the shared store for a short time and are
//! echoed back in the `X-XSRF-TOKEN` header.

use axum::{
    extract::Extension,
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use super::{
    principal::require_auth,
    types::{CsrfResponse, ErrorBody},
    utils::unavailable,
};
use crate::{api::AppState, error::AuthError, token::opaque_token};

pub const CSRF_HEADER: &str = "x-xsrf-token";

pub(super) fn presented_csrf(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Reject the request unless it carries a live CSRF token.
///
/// # Errors
/// `CsrfRejected` for a missing or unknown token, `Unavailable` if the
/// store cannot answer.
pub async fn require_csrf(headers: &HeaderMap, state: &AppState) -> Result<(), AuthError> {
    let Some(token) = presented_csrf(headers) else {
        return Err(AuthError::CsrfRejected);
    };
    match state.sessions().csrf_exists(token).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(AuthError::CsrfRejected),
        Err(err) => Err(unavailable("CSRF lookup failed", err)),
    }
}

#[utoipa::path(
    get,
    path = "/v1/auth/csrf",
    responses(
        (status = 200, description = "CSRF token issued", body = CsrfResponse),
        (status = 401, description = "Not authenticated", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn issue_csrf(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<impl IntoResponse, AuthError> {
    require_auth(&headers, &state).await?;

    let token = opaque_token().map_err(|e| unavailable("CSRF token generation failed", e))?;
    let ttl = state.config().csrf_ttl();
    state
        .sessions()
        .store_csrf(&token, ttl)
        .await
        .map_err(|e| unavailable("Failed to store CSRF token", e))?;

    Ok(Json(CsrfResponse {
        csrf_token: token,
        expires_in: ttl.as_secs(),
    }))
}
