//! Token service: stateless access tokens, rotated opaque refresh tokens.

pub mod access;
pub mod service;
pub mod store;

use base64::Engine;
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use sqlx::{postgres::PgRow, FromRow, Row};
use uuid::Uuid;

pub use access::{AccessClaims, AccessTokenSigner};
pub use service::TokenService;
pub use store::{RotateOutcome, TokenStore};

use crate::error::{Error, Result};

/// Access/refresh pair handed to the caller. The refresh value is the only
/// copy of the raw token; the store keeps a hash.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Server-side refresh-token record. `chain_id` ties every rotation of one
/// login session together so reuse detection can revoke the whole family.
#[derive(Debug, Clone)]
pub struct RefreshRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub chain_id: Uuid,
    pub token_hash: Vec<u8>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub replaced_by: Option<Uuid>,
}

impl RefreshRecord {
    #[must_use]
    pub const fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

impl<'r> FromRow<'r, PgRow> for RefreshRecord {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            chain_id: row.try_get("chain_id")?,
            token_hash: row.try_get("token_hash")?,
            issued_at: row.try_get("issued_at")?,
            expires_at: row.try_get("expires_at")?,
            revoked_at: row.try_get("revoked_at")?,
            replaced_by: row.try_get("replaced_by")?,
        })
    }
}

/// Create a new opaque refresh token. The raw value is only returned to the
/// caller; the store keeps a hash.
pub fn generate_refresh_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| Error::Storage(anyhow::anyhow!("failed to generate refresh token: {err}")))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a refresh token so raw values never touch the database.
#[must_use]
pub fn hash_refresh_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}
