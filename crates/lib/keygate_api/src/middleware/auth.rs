//! Authentication middleware — token extraction, JWT verification, and the
//! revocation-cache cross-check.
//!
//! Tokens are read from the httpOnly cookie first, then from
//! `Authorization: Bearer` for non-browser clients. Verified claims land in
//! request extensions so handlers never re-parse the token.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::error;

use keygate_core::cache::access_key;

use crate::AppState;
use crate::cookies::{ACCESS_COOKIE, REFRESH_COOKIE};
use crate::error::AppError;

/// Verified access-token identity stored in request extensions.
#[derive(Debug, Clone)]
pub struct AccessContext {
    pub user_id: i64,
    pub email: String,
    pub jti: String,
    pub token: String,
}

/// Verified refresh-token identity stored in request extensions.
#[derive(Debug, Clone)]
pub struct RefreshContext {
    pub user_id: i64,
    pub email: String,
    pub token: String,
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
}

/// Cookie first, `Authorization: Bearer` as the fallback.
fn token_from_request(
    jar: &CookieJar,
    headers: &HeaderMap,
    cookie_name: &str,
) -> Result<String, AppError> {
    if let Some(cookie) = jar.get(cookie_name) {
        if !cookie.value().is_empty() {
            return Ok(cookie.value().to_string());
        }
    }
    bearer_token(headers)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("missing credentials".into()))
}

/// Axum middleware: verifies the access token, cross-checks its jti against
/// the revocation cache, and injects [`AccessContext`].
///
/// A token whose signature verifies but whose jti is absent from the cache
/// (or differs from the cached one) has been superseded by a later login or
/// revoked by logout.
pub async fn require_access(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = token_from_request(&jar, request.headers(), ACCESS_COOKIE)?;

    let claims = state.maker.verify_access_token(&token)?;
    if claims.jti.is_empty() || claims.sub <= 0 || claims.email.is_empty() {
        return Err(AppError::Unauthorized("malformed token claims".into()));
    }

    // Fail closed: a cache backend error is indistinguishable from a
    // revoked token as far as the client is concerned.
    let cached = match state.cache.get(&access_key(claims.sub)).await {
        Ok(cached) => cached,
        Err(e) => {
            error!(error = %e, "revocation cache lookup failed");
            return Err(AppError::Unauthorized("failed to verify token".into()));
        }
    };
    if cached.as_deref() != Some(claims.jti.as_str()) {
        return Err(AppError::Unauthorized("token has been revoked".into()));
    }

    request.extensions_mut().insert(AccessContext {
        user_id: claims.sub,
        email: claims.email,
        jti: claims.jti,
        token,
    });

    Ok(next.run(request).await)
}

/// Axum middleware: verifies the refresh token and injects [`RefreshContext`].
/// No cache check here; the session row is the authority, and the handler
/// consults it.
pub async fn require_refresh(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = token_from_request(&jar, request.headers(), REFRESH_COOKIE)?;

    let claims = state.maker.verify_refresh_token(&token)?;
    if claims.sub <= 0 || claims.email.is_empty() {
        return Err(AppError::Unauthorized("malformed token claims".into()));
    }

    request.extensions_mut().insert(RefreshContext {
        user_id: claims.sub,
        email: claims.email,
        token,
    });

    Ok(next.run(request).await)
}
