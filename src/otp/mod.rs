//! One-time passcodes: purpose-bound, salted-hashed, short-lived.

pub mod engine;
pub mod store;

use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, Rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{postgres::PgRow, FromRow, Row};
use std::fmt;
use uuid::Uuid;

pub use engine::OtpEngine;
pub use store::OtpStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    Registration,
    PasswordReset,
}

impl OtpPurpose {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::PasswordReset => "password_reset",
        }
    }

    /// Parse the persisted `otps.purpose` textual value into a typed enum.
    pub fn from_db(value: &str) -> Result<Self, sqlx::Error> {
        match value {
            "registration" => Ok(Self::Registration),
            "password_reset" => Ok(Self::PasswordReset),
            _ => Err(sqlx::Error::Decode(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid otps.purpose value: {value}"),
            )))),
        }
    }
}

impl fmt::Display for OtpPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored OTP record. Only the salted hash of the code is persisted; the raw
/// code goes to the delivery collaborator and is never stored.
#[derive(Debug, Clone)]
pub struct OtpRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub purpose: OtpPurpose,
    pub code_salt: Vec<u8>,
    pub code_hash: Vec<u8>,
    pub attempt_count: i32,
    pub resend_count: i32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for OtpRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let purpose: String = row.try_get("purpose")?;
        Ok(Self {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            purpose: OtpPurpose::from_db(&purpose)?,
            code_salt: row.try_get("code_salt")?,
            code_hash: row.try_get("code_hash")?,
            attempt_count: row.try_get("attempt_count")?,
            resend_count: row.try_get("resend_count")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            consumed_at: row.try_get("consumed_at")?,
        })
    }
}

/// Generate a fixed-length numeric code from the OS RNG.
#[must_use]
pub fn generate_code(length: usize) -> String {
    let mut rng = OsRng;
    (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10)))
        .collect()
}

/// Fresh random salt for hashing one code.
#[must_use]
pub fn generate_salt() -> Vec<u8> {
    let mut salt = vec![0u8; 16];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Salted hash of a code; raw codes never touch the database.
#[must_use]
pub fn hash_code(salt: &[u8], code: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(code.as_bytes());
    hasher.finalize().to_vec()
}

/// Constant-time equality over the fixed-length digests.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
