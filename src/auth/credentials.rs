//! One-way hash and verify for passwords and wallet PINs.
//!
//! Plaintext never leaves the call stack: it is hashed here and only the
//! salted digest is handed to the stores.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential hashing failed")]
    Hash(argon2::password_hash::Error),
}

/// Pluggable salted one-way verification function.
///
/// `verify` must treat a malformed digest exactly like a mismatch: return
/// `false`, never raise, so callers cannot tell corrupt records apart from
/// wrong passwords by error shape or timing class.
pub trait CredentialVerifier: Send + Sync {
    fn hash(&self, plaintext: &str) -> Result<String, CredentialError>;
    fn verify(&self, plaintext: &str, digest: &str) -> bool;
}

/// Argon2id with per-credential random salt, PHC-string digests.
#[derive(Clone, Copy, Debug, Default)]
pub struct Argon2Verifier;

impl CredentialVerifier for Argon2Verifier {
    fn hash(&self, plaintext: &str) -> Result<String, CredentialError> {
        let salt = SaltString::generate(&mut OsRng);
        let digest = Argon2::default()
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(CredentialError::Hash)?;
        Ok(digest.to_string())
    }

    fn verify(&self, plaintext: &str, digest: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(digest) else {
            return false;
        };
        Argon2::default()
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_round_trip() {
        let verifier = Argon2Verifier;
        let digest = verifier.hash("hunter2").expect("hash");
        assert!(verifier.verify("hunter2", &digest));
        assert!(!verifier.verify("hunter3", &digest));
    }

    #[test]
    fn salts_differ_between_hashes() {
        let verifier = Argon2Verifier;
        let first = verifier.hash("same-password").expect("hash");
        let second = verifier.hash("same-password").expect("hash");
        assert_ne!(first, second);
        assert!(verifier.verify("same-password", &first));
        assert!(verifier.verify("same-password", &second));
    }

    #[test]
    fn malformed_digest_is_a_plain_mismatch() {
        let verifier = Argon2Verifier;
        assert!(!verifier.verify("anything", ""));
        assert!(!verifier.verify("anything", "not-a-phc-string"));
        assert!(!verifier.verify("anything", "$argon2id$v=19$garbage"));
    }
}
