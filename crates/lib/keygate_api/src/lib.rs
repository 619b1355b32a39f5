//! # keygate_api
//!
//! HTTP API library for Keygate.

pub mod cookies;
pub mod error;
pub mod handlers;
pub mod middleware;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use chrono::Duration as ChronoDuration;
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

use keygate_core::cache::RevocationCache;
use keygate_core::limiter::LimiterRegistry;
use keygate_core::service::AuthService;
use keygate_core::token::TokenMaker;

use crate::handlers::auth;
use crate::middleware::{auth as gate, rate_limit};

/// Requests still in flight after this long are cut off with a 408.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Orchestrates the auth flows against store, cache, and token maker.
    pub auth: Arc<AuthService>,
    /// Token maker, used directly by the gates.
    pub maker: Arc<dyn TokenMaker>,
    /// Revocation cache, consulted by the access gate.
    pub cache: Arc<dyn RevocationCache>,
    /// Limiter for unauthenticated endpoints, keyed by client address.
    pub address_limiter: Arc<LimiterRegistry>,
    /// Limiter for authenticated endpoints, keyed by identity.
    pub identity_limiter: Arc<LimiterRegistry>,
    /// Access-token lifetime; also the access cookie's max-age.
    pub access_ttl: ChronoDuration,
    /// Refresh-token lifetime; also the refresh cookie's max-age.
    pub refresh_ttl: ChronoDuration,
}

/// Run embedded database migrations.
///
/// Delegates to `keygate_core::migrate::migrate()` which owns the migration
/// files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    keygate_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes and shared state.
///
/// Three route groups with distinct gates: public (address-limited only),
/// refresh-gated (logout, refresh), and access-gated (me). Within the gated
/// groups the token gate is the outer layer, so the identity limiter only
/// ever sees verified requests.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let public = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit::limit_by_address,
        ));

    let refresh_gated = Router::new()
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit::limit_by_identity,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            gate::require_refresh,
        ));

    let access_gated = Router::new()
        .route("/auth/me", get(auth::me))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit::limit_by_identity,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            gate::require_access,
        ));

    Router::new()
        .merge(public)
        .merge(refresh_gated)
        .merge(access_gated)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(cors)
        .with_state(state)
}
