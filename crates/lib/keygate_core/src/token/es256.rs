//! ES256 strategy: an EC private key signs, the public key verifies.
//!
//! Lets parties that hold only the public key verify tokens without being
//! able to mint them.

use std::path::Path;

use chrono::Duration;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, decode, encode};

use super::{
    AccessClaims, RefreshClaims, TokenError, TokenMaker, TokenPair, build_access_claims,
    build_refresh_claims, map_decode_error, map_encode_error, new_jti, validation,
};
use crate::models::User;

/// Asymmetric token maker built from a PEM-encoded P-256 key pair.
pub struct Es256Maker {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
}

impl Es256Maker {
    /// Build a maker from in-memory PEM key material.
    pub fn from_pem(
        private_pem: &[u8],
        public_pem: &[u8],
        issuer: &str,
    ) -> Result<Self, TokenError> {
        let encoding = EncodingKey::from_ec_pem(private_pem)
            .map_err(|e| TokenError::KeyMaterial(format!("private key: {e}")))?;
        let decoding = DecodingKey::from_ec_pem(public_pem)
            .map_err(|e| TokenError::KeyMaterial(format!("public key: {e}")))?;
        Ok(Self {
            encoding,
            decoding,
            issuer: issuer.to_string(),
        })
    }

    /// Build a maker from PEM files on disk.
    pub fn from_pem_files(
        private_path: impl AsRef<Path>,
        public_path: impl AsRef<Path>,
        issuer: &str,
    ) -> Result<Self, TokenError> {
        let private_pem = std::fs::read(private_path.as_ref()).map_err(|e| {
            TokenError::KeyMaterial(format!("{}: {e}", private_path.as_ref().display()))
        })?;
        let public_pem = std::fs::read(public_path.as_ref()).map_err(|e| {
            TokenError::KeyMaterial(format!("{}: {e}", public_path.as_ref().display()))
        })?;
        Self::from_pem(&private_pem, &public_pem, issuer)
    }
}

impl TokenMaker for Es256Maker {
    fn create_token(
        &self,
        user: &User,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Result<TokenPair, TokenError> {
        let access_claims =
            build_access_claims(user.id, &user.email, &self.issuer, access_ttl, new_jti());
        let access_token = encode(
            &Header::new(Algorithm::ES256),
            &access_claims,
            &self.encoding,
        )
        .map_err(map_encode_error)?;

        let refresh_claims = build_refresh_claims(user.id, &user.email, &self.issuer, refresh_ttl);
        let refresh_token = encode(
            &Header::new(Algorithm::ES256),
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
            &validation(Algorithm::ES256, &self.issuer),
        )
        .map(|data| data.claims)
        .map_err(map_decode_error)
    }

    fn verify_refresh_token(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        decode::<RefreshClaims>(
            token,
            &self.decoding,
            &validation(Algorithm::ES256, &self.issuer),
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
        encode(&Header::new(Algorithm::ES256), &claims, &self.encoding)
            .map_err(map_encode_error)
    }
}
