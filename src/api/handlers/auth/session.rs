use axum::{extract::Extension, http::HeaderMap, Json};
use std::sync::Arc;

use super::{principal::require_auth, types::ErrorBody};
use crate::{api::AppState, error::AuthError, guard::Identity};

/// Identity of the authenticated caller, as read from the session record.
#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Current session identity", body = Identity),
        (status = 401, description = "Not authenticated", body = ErrorBody),
        (status = 403, description = "Tenant not allowed", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn session(
    headers: HeaderMap,
    state: Extension<Arc<AppState>>,
) -> Result<Json<Identity>, AuthError> {
    require_auth(&headers, &state).await.map(Json)
}
