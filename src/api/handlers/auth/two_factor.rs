//! TOTP endpoints: finish a login challenge, and enroll an authenticator.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::{
    csrf::require_csrf,
    login::check_rate,
    principal::require_auth,
    tokens::open_session,
    types::{EnableTwoFactorRequest, ErrorBody, MessageResponse, TokenResponse, VerifyTwoFactorRequest},
    utils::{unavailable, user_agent},
};
use crate::{
    api::{AppState, ClientAddr},
    error::AuthError,
    limiter::{BlockScope, RateLimitAction},
    two_factor::{PendingSecret, TwoFactorError},
};

async fn reject_code(state: &AppState, client: &ClientAddr) -> AuthError {
    match state
        .blocks()
        .record_failure(BlockScope::VerifyTwoFactor, client.as_str())
        .await
    {
        Ok(outcome) => {
            warn!(remaining = outcome.remaining, "Two-factor code rejected");
            AuthError::TwoFactorInvalid
        }
        Err(err) => err,
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/2fa/verify",
    request_body = VerifyTwoFactorRequest,
    responses(
        (status = 200, description = "Code accepted, session opened", body = TokenResponse),
        (status = 401, description = "Unknown challenge or wrong code", body = ErrorBody),
        (status = 429, description = "Rate limited or blocked", body = ErrorBody)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn verify_two_factor(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    client: Extension<ClientAddr>,
    Json(request): Json<VerifyTwoFactorRequest>,
) -> Result<impl IntoResponse, AuthError> {
    check_rate(&state, RateLimitAction::VerifyTwoFactor, &client).await?;
    state
        .blocks()
        .ensure_not_blocked(BlockScope::VerifyTwoFactor, client.as_str())
        .await?;

    let flow = state.two_factor();
    let Some(user_id) = flow.challenge_user(&request.challenge_token).await? else {
        return Err(reject_code(&state, &client).await);
    };

    let account = state
        .accounts()
        .find_by_id(user_id)
        .await
        .map_err(|e| unavailable("Account lookup failed", e))?
        .filter(|account| account.active);
    let Some((account, secret)) =
        account.and_then(|account| account.two_factor_secret.clone().map(|secret| (account, secret)))
    else {
        return Err(reject_code(&state, &client).await);
    };

    if !flow.check_code(&secret, &request.code)? {
        return Err(reject_code(&state, &client).await);
    }
    // A concurrent verify with the same challenge may have won already.
    if !flow.consume_challenge(&request.challenge_token, user_id).await? {
        return Err(reject_code(&state, &client).await);
    }

    state
        .blocks()
        .reset(BlockScope::VerifyTwoFactor, client.as_str())
        .await?;

    let tokens = open_session(&state, &account, &user_agent(&headers)).await?;
    flow.mark_verified(tokens.session_id, state.config().refresh_ttl())
        .await?;

    info!(user_id = %account.id, session_id = %tokens.session_id, "Two-factor login completed");
    Ok((StatusCode::OK, Json(tokens)))
}

#[utoipa::path(
    post,
    path = "/v1/auth/2fa/setup",
    responses(
        (status = 200, description = "Pending TOTP secret, reused until confirmed or expired", body = PendingSecret),
        (status = 401, description = "Not authenticated", body = ErrorBody),
        (status = 409, description = "Two-factor already enabled", body = MessageResponse)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn setup_two_factor(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<Response, AuthError> {
    let identity = require_auth(&headers, &state).await?;

    let enabled = state
        .accounts()
        .find_by_id(identity.user_id)
        .await
        .map_err(|e| unavailable("Account lookup failed", e))?
        .is_some_and(|account| account.two_factor_secret.is_some());
    if enabled {
        return Ok((
            StatusCode::CONFLICT,
            Json(MessageResponse::new("Two-factor authentication is already enabled")),
        )
            .into_response());
    }

    let pending = state
        .two_factor()
        .issue_secret(identity.user_id, &identity.email)
        .await?;
    Ok((StatusCode::OK, Json(pending)).into_response())
}

#[utoipa::path(
    post,
    path = "/v1/auth/2fa/enable",
    request_body = EnableTwoFactorRequest,
    params(
        ("X-XSRF-TOKEN" = String, Header, description = "Token from GET /v1/auth/csrf")
    ),
    responses(
        (status = 200, description = "Two-factor enabled", body = MessageResponse),
        (status = 401, description = "Not authenticated, no pending secret or wrong code", body = ErrorBody),
        (status = 403, description = "CSRF token rejected", body = ErrorBody),
        (status = 429, description = "Rate limited or blocked", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn enable_two_factor(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    client: Extension<ClientAddr>,
    Json(request): Json<EnableTwoFactorRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let identity = require_auth(&headers, &state).await?;
    require_csrf(&headers, &state).await?;
    check_rate(&state, RateLimitAction::VerifyTwoFactor, &client).await?;
    state
        .blocks()
        .ensure_not_blocked(BlockScope::VerifyTwoFactor, client.as_str())
        .await?;

    let secret = match state
        .two_factor()
        .confirm_secret(identity.user_id, &request.code)
        .await
    {
        Ok(secret) => secret,
        Err(TwoFactorError::InvalidCode) => return Err(reject_code(&state, &client).await),
        Err(err) => return Err(err.into()),
    };

    state
        .accounts()
        .enable_two_factor(identity.user_id, &secret)
        .await
        .map_err(|e| unavailable("Failed to store two-factor secret", e))?;
    state
        .blocks()
        .reset(BlockScope::VerifyTwoFactor, client.as_str())
        .await?;
    state
        .two_factor()
        .mark_verified(identity.session_id, state.config().refresh_ttl())
        .await?;

    info!(user_id = %identity.user_id, "Two-factor authentication enabled");
    Ok((
        StatusCode::OK,
        Json(MessageResponse::new("Two-factor authentication enabled")),
    ))
}
