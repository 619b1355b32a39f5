//! Rate-limiting middleware.
//!
//! Public endpoints are throttled per client address; authenticated endpoints
//! per identity, so one abusive account cannot consume another's budget. The
//! identity layer is mounted inside the auth gate, which means rejected
//! credentials never reach a bucket.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use crate::AppState;
use crate::error::AppError;
use crate::middleware::auth::{AccessContext, RefreshContext};

/// Client key for unauthenticated requests: the first `X-Forwarded-For` hop
/// when present, else the peer address.
fn client_address(request: &Request) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Throttle by client address. Applied to the public auth endpoints.
pub async fn limit_by_address(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = client_address(&request);
    if !state.address_limiter.allow(&key) {
        warn!(client = %key, "address rate limit exceeded");
        return Err(AppError::TooManyRequests);
    }
    Ok(next.run(request).await)
}

/// Throttle by authenticated identity. Runs after a token gate, so the
/// verified email is in extensions; a request that somehow reaches this layer
/// without one falls back to the address key.
pub async fn limit_by_identity(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = request
        .extensions()
        .get::<AccessContext>()
        .map(|ctx| ctx.email.clone())
        .or_else(|| {
            request
                .extensions()
                .get::<RefreshContext>()
                .map(|ctx| ctx.email.clone())
        })
        .unwrap_or_else(|| client_address(&request));

    if !state.identity_limiter.allow(&key) {
        warn!(identity = %key, "identity rate limit exceeded");
        return Err(AppError::TooManyRequests);
    }
    Ok(next.run(request).await)
}
