//! Authentication request handlers.

use axum::extract::{Extension, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use keygate_core::cache::access_key;
use keygate_core::models::User;
use keygate_core::token::TokenPair;

use crate::AppState;
use crate::cookies;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::{AccessContext, RefreshContext};

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Response for register and login: the profile plus both tokens. The tokens
/// are also set as httpOnly cookies; the body copy is for non-browser clients.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

fn validate_email(email: &str) -> Result<(), AppError> {
    let ok = email.contains('@') && !email.starts_with('@') && !email.ends_with('@');
    if ok {
        Ok(())
    } else {
        Err(AppError::BadRequest("invalid email address".into()))
    }
}

fn validate_password(password: &str) -> Result<(), AppError> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

fn session_cookies(
    jar: CookieJar,
    headers: &HeaderMap,
    state: &AppState,
    pair: &TokenPair,
) -> CookieJar {
    let secure = cookies::request_is_secure(headers);
    jar.add(cookies::access_cookie(
        &pair.access_token,
        state.access_ttl.num_seconds(),
        secure,
    ))
    .add(cookies::refresh_cookie(
        &pair.refresh_token,
        state.refresh_ttl.num_seconds(),
        secure,
    ))
}

/// `POST /auth/register` — create an account and open a session.
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(body): Json<RegisterRequest>,
) -> AppResult<impl IntoResponse> {
    if body.name.trim().is_empty() {
        return Err(AppError::BadRequest("name is required".into()));
    }
    validate_email(&body.email)?;
    validate_password(&body.password)?;

    let (user, pair) = state
        .auth
        .register(body.name.trim(), &body.email, &body.password)
        .await?;

    let jar = session_cookies(jar, &headers, &state, &pair);
    let resp = SessionResponse {
        user,
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
    };
    Ok((StatusCode::CREATED, jar, Json(resp)))
}

/// `POST /auth/login` — authenticate with email + password.
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> AppResult<impl IntoResponse> {
    validate_email(&body.email)?;
    if body.password.is_empty() {
        return Err(AppError::BadRequest("password is required".into()));
    }

    let (user, pair) = state.auth.login(&body.email, &body.password).await?;

    let jar = session_cookies(jar, &headers, &state, &pair);
    let resp = SessionResponse {
        user,
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
    };
    Ok((StatusCode::OK, jar, Json(resp)))
}

/// `POST /auth/logout` — end the session named by the refresh token and
/// clear both cookies.
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Extension(ctx): Extension<RefreshContext>,
) -> AppResult<impl IntoResponse> {
    state.auth.logout(&ctx.token, ctx.user_id).await?;

    let secure = cookies::request_is_secure(&headers);
    let jar = jar
        .add(cookies::clear_access_cookie(secure))
        .add(cookies::clear_refresh_cookie(secure));
    let resp = MessageResponse {
        message: "logged out".into(),
    };
    Ok((StatusCode::OK, jar, Json(resp)))
}

/// `POST /auth/refresh` — mint a new access token against the existing
/// refresh session. The refresh token itself is not rotated.
///
/// The jti is recovered from the revocation cache so the new token slots into
/// the existing entry; if the entry already lapsed a fresh jti is minted and
/// the token will only pass the gate after the next login reinstalls one.
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Extension(ctx): Extension<RefreshContext>,
) -> AppResult<impl IntoResponse> {
    let jti = match state.cache.get(&access_key(ctx.user_id)).await {
        Ok(Some(jti)) if !jti.is_empty() => jti,
        Ok(_) => Uuid::new_v4().to_string(),
        Err(e) => {
            error!(error = %e, "revocation cache lookup failed");
            return Err(AppError::Internal("failed to refresh token".into()));
        }
    };

    let access_token = state
        .auth
        .refresh_access_token(&ctx.token, &ctx.email, ctx.user_id, &jti)
        .await?;

    let secure = cookies::request_is_secure(&headers);
    let jar = jar.add(cookies::access_cookie(
        &access_token,
        state.access_ttl.num_seconds(),
        secure,
    ));
    Ok((StatusCode::CREATED, jar, Json(RefreshResponse { access_token })))
}

/// `GET /auth/me` — profile of the authenticated user.
pub async fn me(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
) -> AppResult<Json<User>> {
    let user = state.auth.me(&ctx.email).await?;
    Ok(Json(user))
}
