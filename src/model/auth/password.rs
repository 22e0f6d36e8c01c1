//! Credential hashing shared by admins and voters.

use argon2::{Config, Error as Argon2Error};
use rand::Rng;

/// Hash a plaintext password with a fresh random salt.
pub fn hash(password: &str) -> Result<String, Argon2Error> {
    // 16 bytes is recommended for password hashing:
    //  https://en.wikipedia.org/wiki/Argon2
    let mut salt = [0_u8; 16];
    rand::thread_rng().fill(&mut salt);
    argon2::hash_encoded(password.as_bytes(), &salt, &Config::default())
}

/// Check a plaintext password against an encoded hash.
/// A malformed hash never verifies.
pub fn verify(encoded: &str, password: &str) -> bool {
    argon2::verify_encoded(encoded, password.as_bytes()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let encoded = hash("correct horse").unwrap();
        assert!(verify(&encoded, "correct horse"));
        assert!(!verify(&encoded, "battery staple"));
    }

    #[test]
    fn salts_differ_between_hashes() {
        assert_ne!(hash("same").unwrap(), hash("same").unwrap());
    }

    #[test]
    fn garbage_hash_is_rejected() {
        assert!(!verify("not-a-hash", "anything"));
    }
}
