//! Keygate authentication server binary.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use keygate_core::cache::RedisCache;
use keygate_core::config::AuthConfig;
use keygate_core::limiter::{LimiterConfig, LimiterRegistry};
use keygate_core::service::AuthService;
use keygate_core::store::PgStore;

/// CLI arguments for the auth server.
#[derive(Parser, Debug)]
#[command(name = "keygate_server", about = "Keygate authentication server")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:8080")]
    bind_addr: String,

    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/keygate"
    )]
    database_url: String,

    /// Redis connection URL for the revocation cache.
    #[arg(long, env = "REDIS_URL", default_value = "redis://localhost:6379")]
    redis_url: String,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,keygate_api=debug,keygate_core=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    let config = AuthConfig::from_env();
    config.validate()?;

    info!(bind_addr = %args.bind_addr, strategy = ?config.strategy, "starting keygate_server");

    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .connect(&args.database_url)
        .await?;

    info!("running database migrations");
    keygate_api::migrate(&pool).await?;

    let maker = config.token_maker()?;
    let cache = Arc::new(RedisCache::new(&args.redis_url)?);
    let store = Arc::new(PgStore::new(pool));

    let auth = Arc::new(AuthService::new(
        store,
        cache.clone(),
        maker.clone(),
        config.access_ttl,
        config.refresh_ttl,
    ));

    let state = keygate_api::AppState {
        auth,
        maker,
        cache,
        address_limiter: Arc::new(LimiterRegistry::new(LimiterConfig::per_address())),
        identity_limiter: Arc::new(LimiterRegistry::new(LimiterConfig::per_identity())),
        access_ttl: config.access_ttl,
        refresh_ttl: config.refresh_ttl,
    };

    let app = keygate_api::router(state);

    let listener = tokio::net::TcpListener::bind(&args.bind_addr).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "auth API listening");

    // ConnectInfo feeds the address limiter when no forwarding proxy is
    // in front.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
