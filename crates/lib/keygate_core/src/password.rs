//! Password hashing via bcrypt.

use thiserror::Error;

/// bcrypt cost factor.
const BCRYPT_COST: u32 = 10;

/// Password hashing failure. The digest primitive is a black box; any error
/// from it is internal.
#[derive(Debug, Error)]
#[error("bcrypt: {0}")]
pub struct PasswordError(String);

/// Hash a password with bcrypt (cost 10).
pub fn hash(password: &str) -> Result<String, PasswordError> {
    bcrypt::hash(password, BCRYPT_COST).map_err(|e| PasswordError(e.to_string()))
}

/// Verify a password against a bcrypt digest.
pub fn verify(password: &str, digest: &str) -> Result<bool, PasswordError> {
    bcrypt::verify(password, digest).map_err(|e| PasswordError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_round_trips() {
        let digest = hash("secret1").expect("hash");
        assert_ne!(digest, "secret1");
        assert!(verify("secret1", &digest).expect("verify"));
        assert!(!verify("secret2", &digest).expect("verify"));
    }

    #[test]
    fn verify_rejects_garbage_digest() {
        assert!(verify("secret1", "not-a-bcrypt-digest").is_err());
    }
}
