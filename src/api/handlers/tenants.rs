//! Tenant allow-list endpoints.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use super::auth::{
    require_auth, require_csrf, require_verified,
    types::{ErrorBody, MessageResponse},
};
use crate::{api::AppState, error::AuthError, tenants::publish_refresh};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AllowedTenants {
    pub tenants: Vec<Uuid>,
    pub count: usize,
}

/// Current allow-list snapshot of this process.
#[utoipa::path(
    get,
    path = "/v1/tenants/allowed",
    responses(
        (status = 200, description = "Allowed tenant ids", body = AllowedTenants),
        (status = 401, description = "Not authenticated", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "tenants"
)]
pub async fn allowed(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<Json<AllowedTenants>, AuthError> {
    require_auth(&headers, &state).await?;

    let tenants = state.tenants().snapshot();
    Ok(Json(AllowedTenants {
        count: tenants.len(),
        tenants,
    }))
}

/// Ask every process to reload its allow-list from the directory.
#[utoipa::path(
    post,
    path = "/v1/tenants/refresh",
    params(
        ("X-XSRF-TOKEN" = String, Header, description = "Token from GET /v1/auth/csrf")
    ),
    responses(
        (status = 202, description = "Refresh signal published", body = MessageResponse),
        (status = 401, description = "Not authenticated", body = ErrorBody),
        (status = 403, description = "Two-factor not verified or CSRF token rejected", body = ErrorBody),
        (status = 503, description = "Signal channel unavailable", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "tenants"
)]
#[instrument(skip_all)]
pub async fn refresh(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<impl IntoResponse, AuthError> {
    let identity = require_verified(&headers, &state).await?;
    require_csrf(&headers, &state).await?;

    publish_refresh(state.bus()).await.map_err(|err| {
        error!("Failed to publish tenant refresh: {err}");
        AuthError::Unavailable
    })?;

    info!(user_id = %identity.user_id, "Tenant refresh requested");
    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse::new("Tenant refresh requested")),
    ))
}
