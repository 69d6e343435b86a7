//! Authenticated identity extraction for handlers.

use axum::http::HeaderMap;

use crate::{api::AppState, error::AuthError, guard::Identity};

/// Run the auth guard over the request headers.
///
/// # Errors
/// Returns the guard's rejection.
pub async fn require_auth(headers: &HeaderMap, state: &AppState) -> Result<Identity, AuthError> {
    state.guard().authenticate(headers).await
}

/// Like [`require_auth`], and the session must have completed two-factor
/// verification.
///
/// # Errors
/// `TwoFactorUnverified` for sessions without a confirmed code.
pub async fn require_verified(headers: &HeaderMap, state: &AppState) -> Result<Identity, AuthError> {
    let identity = require_auth(headers, state).await?;
    if state.two_factor().is_verified(identity.session_id).await? {
        Ok(identity)
    } else {
        Err(AuthError::TwoFactorUnverified)
    }
}
