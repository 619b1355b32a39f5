//! Service configuration.

use std::sync::Arc;

use chrono::Duration;
use thiserror::Error;

use crate::token::{Es256Maker, Hs256Maker, TokenError, TokenMaker};

/// Which signing strategy is active for this deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningStrategy {
    Hs256,
    Es256,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Configuration consumed by the core. Values only; loading mechanism lives
/// in the binary.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub strategy: SigningStrategy,
    /// Shared secret; required for HS256.
    pub jwt_secret: String,
    /// PEM paths; required for ES256.
    pub ec_private_key_path: String,
    pub ec_public_key_path: String,
    pub issuer: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl AuthConfig {
    /// Reads configuration from environment variables.
    ///
    /// | Variable                  | Default  |
    /// |---------------------------|----------|
    /// | `JWT_STRATEGY`            | `hs256`  |
    /// | `JWT_SECRET_KEY`          | empty    |
    /// | `EC_PRIVATE_KEY_PATH`     | empty    |
    /// | `EC_PUBLIC_KEY_PATH`      | empty    |
    /// | `TOKEN_ISSUER`            | `keygate`|
    /// | `ACCESS_TOKEN_TTL_SECS`   | `1800`   |
    /// | `REFRESH_TOKEN_TTL_SECS`  | `604800` |
    pub fn from_env() -> Self {
        let strategy = match std::env::var("JWT_STRATEGY").as_deref() {
            Ok("es256") => SigningStrategy::Es256,
            _ => SigningStrategy::Hs256,
        };
        Self {
            strategy,
            jwt_secret: std::env::var("JWT_SECRET_KEY").unwrap_or_default(),
            ec_private_key_path: std::env::var("EC_PRIVATE_KEY_PATH").unwrap_or_default(),
            ec_public_key_path: std::env::var("EC_PUBLIC_KEY_PATH").unwrap_or_default(),
            issuer: std::env::var("TOKEN_ISSUER").unwrap_or_else(|_| "keygate".into()),
            access_ttl: Duration::seconds(env_i64("ACCESS_TOKEN_TTL_SECS", 30 * 60)),
            refresh_ttl: Duration::seconds(env_i64("REFRESH_TOKEN_TTL_SECS", 7 * 24 * 60 * 60)),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.is_empty() {
            return Err(ConfigError::Invalid("TOKEN_ISSUER is required".into()));
        }
        if self.access_ttl <= Duration::zero() {
            return Err(ConfigError::Invalid(
                "ACCESS_TOKEN_TTL_SECS must be greater than 0".into(),
            ));
        }
        if self.refresh_ttl <= self.access_ttl {
            return Err(ConfigError::Invalid(
                "REFRESH_TOKEN_TTL_SECS must be longer than ACCESS_TOKEN_TTL_SECS".into(),
            ));
        }
        match self.strategy {
            SigningStrategy::Hs256 => {
                if self.jwt_secret.is_empty() {
                    return Err(ConfigError::Invalid(
                        "JWT_SECRET_KEY is required for the hs256 strategy".into(),
                    ));
                }
            }
            SigningStrategy::Es256 => {
                if self.ec_private_key_path.is_empty() || self.ec_public_key_path.is_empty() {
                    return Err(ConfigError::Invalid(
                        "EC_PRIVATE_KEY_PATH and EC_PUBLIC_KEY_PATH are required for the es256 strategy"
                            .into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Construct the configured signing strategy. This is the single
    /// selection point; everything downstream holds the trait object.
    pub fn token_maker(&self) -> Result<Arc<dyn TokenMaker>, ConfigError> {
        match self.strategy {
            SigningStrategy::Hs256 => {
                Ok(Arc::new(Hs256Maker::new(&self.jwt_secret, &self.issuer)))
            }
            SigningStrategy::Es256 => Ok(Arc::new(Es256Maker::from_pem_files(
                &self.ec_private_key_path,
                &self.ec_public_key_path,
                &self.issuer,
            )?)),
        }
    }
}

fn env_i64(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
