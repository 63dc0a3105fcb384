//! Stateless access tokens: HS256 JWTs verified without a store lookup.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::account::{Account, Role};
use crate::error::{Error, Result};

/// Claims carried by an access token. Everything needed to authorize a
/// request is in here; validation never touches the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub jti: String,
}

impl AccessClaims {
    /// Subject id as a typed uuid.
    pub fn account_id(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.sub).map_err(|_| Error::InvalidToken)
    }
}

/// Signs and verifies access tokens with a shared HS256 secret.
#[derive(Clone)]
pub struct AccessTokenSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    ttl: Duration,
}

impl AccessTokenSigner {
    #[must_use]
    pub fn new(secret: &SecretString, issuer: String, ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.expose_secret().as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            issuer,
            ttl,
        }
    }

    /// Mint a signed access token for the account.
    pub fn sign(&self, account: &Account) -> Result<String> {
        let now = Utc::now();
        let claims = AccessClaims {
            sub: account.id.to_string(),
            role: account.role,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
            iss: self.issuer.clone(),
            jti: Uuid::new_v4().to_string(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|err| Error::Storage(anyhow::anyhow!("failed to sign access token: {err}")))
    }

    /// Pure signature + expiry + issuer check. No store lookup.
    pub fn verify(&self, token: &str) -> Result<AccessClaims> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);

        decode::<AccessClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Error::TokenExpired,
                _ => Error::InvalidToken,
            })
    }
}
