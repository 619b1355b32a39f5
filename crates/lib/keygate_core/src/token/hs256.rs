//! HS256 strategy: a single shared secret both signs and verifies.

use chrono::Duration;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, decode, encode};

use super::{
    AccessClaims, RefreshClaims, TokenError, TokenMaker, TokenPair, build_access_claims,
    build_refresh_claims, map_decode_error, map_encode_error, new_jti, validation,
};
use crate::models::User;

/// Symmetric token maker. The configuration supplies the secret and the
/// issuer string.
pub struct Hs256Maker {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
}

impl Hs256Maker {
    pub fn new(secret: &str, issuer: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_string(),
        }
    }
}

impl TokenMaker for Hs256Maker {
    fn create_token(
        &self,
        user: &User,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Result<TokenPair, TokenError> {
        let access_claims =
            build_access_claims(user.id, &user.email, &self.issuer, access_ttl, new_jti());
        let access_token = encode(
            &Header::new(Algorithm::HS256),
            &access_claims,
            &self.encoding,
        )
        .map_err(map_encode_error)?;

        let refresh_claims = build_refresh_claims(user.id, &user.email, &self.issuer, refresh_ttl);
        let refresh_token = encode(
            &Header::new(Algorithm::HS256),
            &refresh_claims,
            &self.encoding,
        )
        .map_err(map_encode_error)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            access_claims,
            refresh_claims,
        })
    }

    fn verify_access_token(&self, token: &str) -> Result<AccessClaims, TokenError> {
        decode::<AccessClaims>(
            token,
            &self.decoding,
            &validation(Algorithm::HS256, &self.issuer),
        )
        .map(|data| data.claims)
        .map_err(map_decode_error)
    }

    fn verify_refresh_token(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        decode::<RefreshClaims>(
            token,
            &self.decoding,
            &validation(Algorithm::HS256, &self.issuer),
        )
        .map(|data| data.claims)
        .map_err(map_decode_error)
    }

    fn refresh_access_token(
        &self,
        email: &str,
        user_id: i64,
        access_ttl: Duration,
        jti: &str,
    ) -> Result<String, TokenError> {
        let claims =
            build_access_claims(user_id, email, &self.issuer, access_ttl, jti.to_string());
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(map_encode_error)
    }
}
