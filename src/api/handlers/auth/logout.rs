use axum::{
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::{
    csrf::presented_csrf,
    types::{ErrorBody, LogoutRequest, MessageResponse},
    utils::{seconds_until, unavailable},
};
use crate::{
    api::AppState,
    error::AuthError,
    guard::extract_bearer,
    token::TokenKind,
};

/// End the caller's session. Works even when the session's tenant has
/// been withdrawn from the allow-list.
///
/// Revokes the access token for its remaining lifetime, and the refresh
/// token too when one for the same session is supplied in the body. Then
/// deletes the session record, the active-session pointer, the session's
/// 2FA status and any CSRF token presented.
#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    request_body(content = LogoutRequest, description = "Optional refresh token to revoke"),
    responses(
        (status = 200, description = "Logged out", body = MessageResponse),
        (status = 401, description = "Not authenticated", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn logout(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, AuthError> {
    let token = extract_bearer(&headers)?;
    let identity = state.guard().authenticate_session(token).await?;

    let request = if body.is_empty() {
        LogoutRequest::default()
    } else {
        serde_json::from_slice::<LogoutRequest>(&body).unwrap_or_else(|err| {
            debug!("Ignoring unreadable logout body: {err}");
            LogoutRequest::default()
        })
    };

    let now = Utc::now().timestamp();
    let sessions = state.sessions();
    sessions
        .revoke(token, seconds_until(identity.token_expires_at, now))
        .await
        .map_err(|e| unavailable("Failed to revoke access token", e))?;

    if let Some(refresh) = request.refresh_token.as_deref().map(str::trim) {
        match state.codec().parse_kind(refresh, TokenKind::Refresh) {
            Ok(claims) if claims.sid == identity.session_id => {
                sessions
                    .revoke(refresh, claims.remaining(now))
                    .await
                    .map_err(|e| unavailable("Failed to revoke refresh token", e))?;
            }
            Ok(_) => warn!("Refresh token belongs to another session, not revoking"),
            Err(err) => debug!("Ignoring invalid refresh token on logout: {err}"),
        }
    }

    sessions
        .delete_session(identity.session_id)
        .await
        .map_err(|e| unavailable("Failed to delete session", e))?;
    sessions
        .release_user_session(identity.user_id, identity.session_id)
        .await
        .map_err(|e| unavailable("Failed to release active session", e))?;
    state
        .two_factor()
        .clear_verified(identity.session_id)
        .await?;
    if let Some(csrf) = presented_csrf(&headers) {
        sessions
            .delete_csrf(csrf)
            .await
            .map_err(|e| unavailable("Failed to delete CSRF token", e))?;
    }

    info!(session_id = %identity.session_id, "Logged out");
    Ok((StatusCode::OK, Json(MessageResponse::new("Logged out"))))
}
