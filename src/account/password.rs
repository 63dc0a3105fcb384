//! Password policy and argon2 hashing.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use secrecy::{ExposeSecret, SecretString};

use crate::error::{Error, Result};

const SPECIAL_CHARS: &str = "@$!%*?&";

/// Validate the password policy: at least 8 characters with one uppercase,
/// one lowercase, one digit, and one special character.
///
/// Returns every violated rule so callers can surface them all at once.
#[must_use]
pub fn policy_violations(password: &str) -> Vec<String> {
    let mut violations = Vec::new();
    if password.chars().count() < 8 {
        violations.push("password must be at least 8 characters long".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        violations.push("password must contain at least one uppercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        violations.push("password must contain at least one lowercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        violations.push("password must contain at least one digit".to_string());
    }
    if !password.chars().any(|c| SPECIAL_CHARS.contains(c)) {
        violations.push(format!(
            "password must contain at least one special character ({SPECIAL_CHARS})"
        ));
    }
    violations
}

/// Enforce the policy, collapsing violations into a single `Validation` error.
pub fn enforce_policy(password: &SecretString) -> Result<()> {
    let violations = policy_violations(password.expose_secret());
    if violations.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(violations.join("; ")))
    }
}

/// Hash a password with argon2id and a fresh random salt.
pub fn hash_password(password: &SecretString) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.expose_secret().as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| Error::Storage(anyhow::anyhow!("failed to hash password: {err}")))
}

/// Verify a password against a stored argon2 hash.
///
/// A malformed stored hash is a storage defect, not a caller error.
pub fn verify_password(password: &SecretString, stored_hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|err| Error::Storage(anyhow::anyhow!("malformed password hash: {err}")))?;
    Ok(Argon2::default()
        .verify_password(password.expose_secret().as_bytes(), &parsed)
        .is_ok())
}
