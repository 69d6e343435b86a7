use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::{
    tokens::establish,
    types::{ErrorBody, RefreshRequest, TokenResponse},
    utils::{unavailable, user_agent},
};
use crate::{api::AppState, error::AuthError, token::TokenKind};

/// Exchange a refresh token for a new pair on the same session.
///
/// The refresh token must not be revoked and its session must still be the
/// user's active one. Membership is reloaded so role changes take effect,
/// the active-session pointer and 2FA status are renewed for another
/// refresh lifetime, and the consumed refresh token is revoked.
#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New token pair", body = TokenResponse),
        (status = 401, description = "Refresh token rejected", body = ErrorBody)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn refresh(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    Json(request): Json<RefreshRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let token = request.refresh_token.trim();
    let claims = state
        .codec()
        .parse_kind(token, TokenKind::Refresh)
        .map_err(AuthError::from)?;

    let sessions = state.sessions();
    match sessions.is_revoked(token).await {
        Ok(false) => {}
        Ok(true) => return Err(AuthError::SessionNotFound),
        Err(err) => {
            error!("Revocation lookup failed, denying refresh: {err}");
            return Err(AuthError::SessionNotFound);
        }
    }

    match sessions.current_user_session(claims.sub).await {
        Ok(Some(active)) if active == claims.sid => {}
        Ok(_) => {
            warn!(session_id = %claims.sid, "Refresh for a session that is no longer active");
            return Err(AuthError::SessionNotFound);
        }
        Err(err) => {
            error!("Active session lookup failed, denying refresh: {err}");
            return Err(AuthError::SessionNotFound);
        }
    }

    let account = state
        .accounts()
        .find_by_id(claims.sub)
        .await
        .map_err(|e| unavailable("Account lookup failed", e))?
        .filter(|account| account.active)
        .ok_or(AuthError::SessionNotFound)?;

    let tokens = establish(&state, &account, claims.sid, &user_agent(&headers)).await?;

    // The pointer and the 2FA flag must live as long as the new refresh token.
    let refresh_ttl = state.config().refresh_ttl();
    let displaced = sessions
        .replace_user_session(claims.sub, claims.sid, refresh_ttl)
        .await
        .map_err(|e| unavailable("Failed to extend active session", e))?;
    if let Some(other) = displaced {
        warn!(%other, session_id = %claims.sid, "Active session changed during refresh");
    }
    state
        .two_factor()
        .extend_verified(claims.sid, refresh_ttl)
        .await?;

    let now = Utc::now().timestamp();
    sessions
        .revoke(token, claims.remaining(now))
        .await
        .map_err(|e| unavailable("Failed to revoke consumed refresh token", e))?;

    info!(session_id = %claims.sid, "Session refreshed");
    Ok((StatusCode::OK, Json(tokens)))
}
