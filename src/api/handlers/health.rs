//! Liveness of this process and its shared cache.
//!
//! The cache is the only dependency probed: without it no session can be
//! validated, while the tenant allow-list keeps serving its last snapshot.

use crate::{api::AppState, GIT_COMMIT_HASH};
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info_span, Instrument};
use utoipa::ToSchema;

const PROBE_KEY: &str = "health:probe";
const X_APP: &str = "x-app";

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Ok,
    Error,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    cache: CacheStatus,
    /// Tenants in this process's allow-list snapshot.
    tenants: usize,
    /// Seconds since the allow-list was last loaded, if it ever was.
    tenants_age_seconds: Option<u64>,
}

/// `name:version:short-commit`, the short commit empty when unknown.
fn x_app(name: &str, version: &str, commit: &str) -> Option<HeaderValue> {
    let short = commit
        .get(..7)
        .filter(|short| short.bytes().all(|b| b.is_ascii_hexdigit()))
        .unwrap_or_default();
    HeaderValue::from_str(&format!("{name}:{version}:{short}")).ok()
}

async fn probe_cache(state: &AppState) -> CacheStatus {
    let span = info_span!("cache.ping", cache.operation = "GET", cache.key = PROBE_KEY);
    match state.sessions().get_raw(PROBE_KEY).instrument(span).await {
        Ok(_) => CacheStatus::Ok,
        Err(err) => {
            error!("Shared cache probe failed: {err}");
            CacheStatus::Error
        }
    }
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Shared cache is reachable", body = Health),
        (status = 503, description = "Shared cache is unreachable", body = Health)
    ),
    tag = "health"
)]
pub async fn health(method: Method, state: Extension<Arc<AppState>>) -> Response {
    let cache = probe_cache(&state).await;
    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cache,
        tenants: state.tenants().len(),
        tenants_age_seconds: state
            .tenants()
            .last_updated()
            .map(|at| at.elapsed().as_secs()),
    };

    let status = match cache {
        CacheStatus::Ok => StatusCode::OK,
        CacheStatus::Error => StatusCode::SERVICE_UNAVAILABLE,
    };

    let mut headers = HeaderMap::new();
    if let Some(value) = x_app(&health.name, &health.version, &health.commit) {
        headers.insert(X_APP, value);
    }

    // HEAD and OPTIONS get the status and X-App only.
    if method == Method::GET {
        (status, headers, Json(health)).into_response()
    } else {
        (status, headers, Body::empty()).into_response()
    }
}
