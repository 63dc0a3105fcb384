//! Issue, rotate, and revoke token pairs.

use chrono::Utc;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use super::store::{RotateOutcome, TokenStore};
use super::{generate_refresh_token, hash_refresh_token, AccessClaims, AccessTokenSigner,
    RefreshRecord, TokenPair};
use crate::account::{Account, AccountStatus, CredentialStore};
use crate::config::AuthConfig;
use crate::error::{Error, Result};

#[derive(Clone)]
pub struct TokenService {
    store: Arc<dyn TokenStore>,
    accounts: Arc<dyn CredentialStore>,
    signer: AccessTokenSigner,
    config: AuthConfig,
}

impl TokenService {
    #[must_use]
    pub fn new(
        store: Arc<dyn TokenStore>,
        accounts: Arc<dyn CredentialStore>,
        config: AuthConfig,
    ) -> Self {
        let signer = AccessTokenSigner::new(
            config.access_token_secret(),
            config.issuer().to_string(),
            config.access_ttl(),
        );
        Self {
            store,
            accounts,
            signer,
            config,
        }
    }

    /// Issue a fresh access/refresh pair, starting a new rotation chain.
    pub async fn issue_pair(&self, account: &Account) -> Result<TokenPair> {
        let access_token = self.signer.sign(account)?;
        let refresh_token = generate_refresh_token()?;
        let now = Utc::now();
        self.store
            .insert(RefreshRecord {
                id: Uuid::new_v4(),
                account_id: account.id,
                chain_id: Uuid::new_v4(),
                token_hash: hash_refresh_token(&refresh_token),
                issued_at: now,
                expires_at: now + self.config.refresh_ttl(),
                revoked_at: None,
                replaced_by: None,
            })
            .await?;
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Rotate a refresh token: the presented token is revoked and a new pair
    /// minted in one atomic step. Of two concurrent calls with the same token
    /// exactly one succeeds; the loser observes `Revoked`.
    ///
    /// Presenting an already-rotated token is treated as theft: the entire
    /// chain is revoked before the error is returned.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let presented_hash = hash_refresh_token(refresh_token);
        let successor_id = Uuid::new_v4();
        let successor_token = generate_refresh_token()?;
        let successor_hash = hash_refresh_token(&successor_token);
        let successor_expires = Utc::now() + self.config.refresh_ttl();

        let outcome = self
            .store
            .rotate(
                &presented_hash,
                successor_id,
                &successor_hash,
                successor_expires,
            )
            .await?;

        let previous = match outcome {
            RotateOutcome::Rotated { previous } => previous,
            RotateOutcome::Missing => return Err(Error::InvalidToken),
            RotateOutcome::Expired => return Err(Error::TokenExpired),
            RotateOutcome::Revoked { chain_id } => {
                let revoked = self.store.revoke_chain(chain_id).await?;
                warn!(
                    security = true,
                    chain_id = %chain_id,
                    revoked,
                    "refresh token reuse detected, chain revoked"
                );
                return Err(Error::Revoked);
            }
        };

        let account = self
            .accounts
            .get(previous.account_id)
            .await?
            .filter(|account| !account.is_deleted())
            .ok_or(Error::InvalidToken)?;

        // Disabled and unverified accounts hold no refresh capability even
        // if a stray token survived revoke-all.
        match account.status {
            AccountStatus::Active | AccountStatus::PendingDeletion => {}
            _ => {
                self.store.revoke_chain(previous.chain_id).await?;
                return Err(Error::Forbidden);
            }
        }

        let access_token = self.signer.sign(&account)?;
        Ok(TokenPair {
            access_token,
            refresh_token: successor_token,
        })
    }

    /// Validate an access token without touching the store.
    pub fn verify_access(&self, access_token: &str) -> Result<AccessClaims> {
        self.signer.verify(access_token)
    }

    /// Revoke one refresh token (logout). Unknown tokens fail with
    /// `InvalidToken`; revoking an already-revoked token is a no-op success.
    pub async fn revoke(&self, refresh_token: &str) -> Result<()> {
        let token_hash = hash_refresh_token(refresh_token);
        if self.store.revoke(&token_hash).await? {
            return Ok(());
        }
        match self.store.get(&token_hash).await? {
            Some(_) => Ok(()),
            None => Err(Error::InvalidToken),
        }
    }

    /// Revoke every outstanding refresh token for an account. No grace
    /// period: password change, disable, and delete all pass through here.
    pub async fn revoke_all(&self, account_id: Uuid) -> Result<u64> {
        self.store.revoke_all_for_account(account_id).await
    }
}
