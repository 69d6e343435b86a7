//! Password login.
//!
//! Flow: per-client limiter, block check, credential check (failures are
//! counted), then either a 2FA challenge (202) or a fresh session (200).

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{info, instrument};

use super::{
    tokens::open_session,
    types::{ErrorBody, LoginRequest, TokenResponse, TwoFactorChallengeResponse},
    utils::{unavailable, user_agent},
};
use crate::{
    accounts::{normalize_email, verify_password},
    api::{AppState, ClientAddr},
    error::AuthError,
    limiter::{BlockScope, RateLimitAction, RateLimitDecision},
};

pub const TWO_FACTOR_REQUIRED: &str = "two_fa_required";

/// Apply the per-action window for `client`.
pub(super) async fn check_rate(
    state: &AppState,
    action: RateLimitAction,
    client: &ClientAddr,
) -> Result<(), AuthError> {
    match state.rate_limiter().check(action, client.as_str()).await {
        Ok(RateLimitDecision::Allowed) => Ok(()),
        Ok(RateLimitDecision::Limited { retry_after }) => {
            Err(AuthError::RateLimited { retry_after })
        }
        Err(err) => Err(unavailable("Rate limiter unavailable", err)),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = TokenResponse),
        (status = 202, description = "Password accepted, TOTP code required", body = TwoFactorChallengeResponse),
        (status = 400, description = "Missing payload", body = ErrorBody),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
        (status = 429, description = "Rate limited or blocked", body = ErrorBody)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn login(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
    client: Extension<ClientAddr>,
    payload: Option<Json<LoginRequest>>,
) -> Result<Response, AuthError> {
    let Some(Json(request)) = payload else {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(ErrorBody {
                error: "Missing payload".to_string(),
                retry_after: None,
            }),
        )
            .into_response());
    };

    check_rate(&state, RateLimitAction::Login, &client).await?;
    state
        .blocks()
        .ensure_not_blocked(BlockScope::Login, client.as_str())
        .await?;

    let account = state
        .accounts()
        .find_by_email(&normalize_email(&request.email))
        .await
        .map_err(|e| unavailable("Account lookup failed", e))?
        .filter(|account| account.active && verify_password(&account.password_hash, &request.password));

    let Some(account) = account else {
        state
            .blocks()
            .record_failure(BlockScope::Login, client.as_str())
            .await?;
        return Err(AuthError::InvalidCredentials);
    };

    state
        .blocks()
        .reset(BlockScope::Login, client.as_str())
        .await?;

    if account.two_factor_secret.is_some() {
        let challenge_token = state.two_factor().begin_challenge(account.id).await?;
        info!(user_id = %account.id, "Password accepted, awaiting two-factor code");
        return Ok((
            StatusCode::ACCEPTED,
            Json(TwoFactorChallengeResponse {
                status: TWO_FACTOR_REQUIRED.to_string(),
                challenge_token,
            }),
        )
            .into_response());
    }

    let tokens = open_session(&state, &account, &user_agent(&headers)).await?;
    info!(user_id = %account.id, session_id = %tokens.session_id, "Login succeeded");
    Ok((StatusCode::OK, Json(tokens)).into_response())
}
