//! Session establishment shared by login, 2FA verification and refresh.

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    types::TokenResponse,
    utils::{unavailable, BEARER},
};
use crate::{
    accounts::Account,
    api::AppState,
    error::AuthError,
    store::SessionMetadata,
    token::{ClaimSet, TokenKind},
};

/// Open a new session for `account`, replacing any session the user
/// already had.
#[instrument(skip_all, fields(user_id = %account.id))]
pub(super) async fn open_session(
    state: &AppState,
    account: &Account,
    user_agent: &str,
) -> Result<TokenResponse, AuthError> {
    let session_id = Uuid::new_v4();
    let tokens = establish(state, account, session_id, user_agent).await?;

    let previous = state
        .sessions()
        .replace_user_session(account.id, session_id, state.config().refresh_ttl())
        .await
        .map_err(|e| unavailable("Failed to record active session", e))?;
    if let Some(previous) = previous {
        info!(%previous, "Replacing earlier session");
        if let Err(err) = state.sessions().delete_session(previous).await {
            warn!("Failed to delete replaced session: {err}");
        }
        if let Err(err) = state.two_factor().clear_verified(previous).await {
            warn!("Failed to clear 2FA status of replaced session: {err}");
        }
    }

    Ok(tokens)
}

/// Snapshot the account's current membership into `session_id` and issue
/// a token pair for it.
pub(super) async fn establish(
    state: &AppState,
    account: &Account,
    session_id: Uuid,
    user_agent: &str,
) -> Result<TokenResponse, AuthError> {
    let membership = state
        .accounts()
        .membership(account.id)
        .await
        .map_err(|e| unavailable("Failed to load membership", e))?
        .ok_or_else(|| {
            warn!(user_id = %account.id, "Account has no active tenant membership");
            AuthError::InvalidCredentials
        })?;

    let session = membership.session(account, session_id, user_agent, Utc::now().timestamp());
    state
        .sessions()
        .put_session(session_id, &session, state.config().access_ttl())
        .await
        .map_err(|e| unavailable("Failed to store session", e))?;

    issue_pair(state, &session)
}

pub(super) fn issue_pair(
    state: &AppState,
    session: &SessionMetadata,
) -> Result<TokenResponse, AuthError> {
    let claims = ClaimSet {
        user_id: session.user_id,
        session_id: session.session_id,
        role_id: session.role_id,
        tenant_id: Some(session.tenant_id),
        user_tenant_id: Some(session.user_tenant_id),
        email: Some(session.email.clone()),
    };
    let config = state.config();
    let access_token = state
        .codec()
        .issue(&claims, TokenKind::Access, config.access_ttl())
        .map_err(|e| unavailable("Failed to sign access token", e))?;
    let refresh_token = state
        .codec()
        .issue(&claims, TokenKind::Refresh, config.refresh_ttl())
        .map_err(|e| unavailable("Failed to sign refresh token", e))?;

    Ok(TokenResponse {
        access_token,
        refresh_token,
        token_type: BEARER.to_string(),
        expires_in: config.access_ttl().as_secs(),
        session_id: session.session_id,
    })
}
