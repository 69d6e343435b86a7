//! Request-wide middleware: client identity and the global limiter.

use axum::{
    extract::{ConnectInfo, Extension, Request},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{net::SocketAddr, sync::Arc};
use tracing::error;

use super::AppState;
use crate::{
    error::AuthError,
    limiter::{RateLimitAction, RateLimitDecision},
};

/// Client identity used as the abuse-control key. Inserted into request
/// extensions by [`throttle`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientAddr(pub String);

impl ClientAddr {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// First `x-forwarded-for` hop, then `x-real-ip`, then the socket peer.
pub(crate) fn client_addr(headers: &HeaderMap, peer: Option<SocketAddr>) -> ClientAddr {
    let forwarded = header_value(headers, "x-forwarded-for")
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let addr = forwarded
        .or_else(|| header_value(headers, "x-real-ip"))
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string());
    ClientAddr(addr)
}

/// Count the request against the per-client, per-method window. Store
/// failures reject the request.
pub async fn throttle(
    Extension(state): Extension<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_addr(request.headers(), peer);
    let key = format!("{}:{}", client.as_str(), request.method());

    match state
        .rate_limiter()
        .check(RateLimitAction::Request, &key)
        .await
    {
        Ok(RateLimitDecision::Allowed) => {}
        Ok(RateLimitDecision::Limited { retry_after }) => {
            return AuthError::RateLimited { retry_after }.into_response();
        }
        Err(err) => {
            error!("Global rate limiter unavailable: {err}");
            return AuthError::Unavailable.into_response();
        }
    }

    request.extensions_mut().insert(client);
    next.run(request).await
}
