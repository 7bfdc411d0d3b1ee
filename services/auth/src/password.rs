//! Password hashing with Argon2

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use common::{CoreError, CoreResult};
use std::sync::OnceLock;

/// Hash a plaintext password into a PHC string with a fresh salt
pub fn hash_password(password: &str) -> CoreResult<String> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| CoreError::Internal(format!("Failed to hash password: {}", e)))?
        .to_string();

    Ok(hash)
}

/// Verify a password against a stored hash
///
/// When there is no stored hash the password is still checked against
/// a fixed dummy hash, so a missing account costs the same time as a
/// wrong password.
pub fn verify_password(password: &str, stored: Option<&str>) -> bool {
    let argon2 = Argon2::default();

    let Some(stored) = stored else {
        if let Some(dummy) = dummy_hash().and_then(|phc| PasswordHash::new(phc).ok()) {
            let _ = argon2.verify_password(password.as_bytes(), &dummy);
        }
        return false;
    };

    match PasswordHash::new(stored) {
        Ok(parsed) => argon2.verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}

fn dummy_hash() -> Option<&'static str> {
    static DUMMY: OnceLock<Option<String>> = OnceLock::new();
    DUMMY
        .get_or_init(|| hash_password("dummy-password-for-timing").ok())
        .as_deref()
}
