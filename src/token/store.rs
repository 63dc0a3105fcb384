//! Refresh-token storage contract and its Postgres implementation.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::Instrument;
use uuid::Uuid;

use super::RefreshRecord;
use crate::error::Result;

/// Outcome of the atomic rotate-on-use step.
#[derive(Debug)]
pub enum RotateOutcome {
    /// The presented token was active; it is now revoked and the successor
    /// inserted. `previous` carries the chain and account for minting.
    Rotated { previous: RefreshRecord },
    /// No record for the presented token.
    Missing,
    /// The token was already rotated or revoked: a reuse signal. The caller
    /// revokes the whole chain.
    Revoked { chain_id: Uuid },
    /// Past its TTL but never revoked.
    Expired,
}

/// Storage for refresh tokens, keyed by token hash. `rotate` is a single
/// conditional revoke-and-replace so exactly one of two concurrent refresh
/// calls can win.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert(&self, record: RefreshRecord) -> Result<()>;

    async fn get(&self, token_hash: &[u8]) -> Result<Option<RefreshRecord>>;

    /// Atomically revoke the presented token (if currently active) and insert
    /// its successor within the same chain.
    async fn rotate(
        &self,
        presented_hash: &[u8],
        successor_id: Uuid,
        successor_hash: &[u8],
        successor_expires: DateTime<Utc>,
    ) -> Result<RotateOutcome>;

    /// Revoke one token. Returns whether an active record was revoked;
    /// idempotent otherwise.
    async fn revoke(&self, token_hash: &[u8]) -> Result<bool>;

    /// Revoke every token in a rotation chain (reuse response).
    async fn revoke_chain(&self, chain_id: Uuid) -> Result<u64>;

    /// Revoke every outstanding token for an account (logout-everywhere,
    /// password change, disable, delete).
    async fn revoke_all_for_account(&self, account_id: Uuid) -> Result<u64>;
}

const TOKEN_COLUMNS: &str =
    "id, account_id, chain_id, token_hash, issued_at, expires_at, revoked_at, replaced_by";

#[derive(Clone)]
pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn insert(&self, record: RefreshRecord) -> Result<()> {
        let query = r"
            INSERT INTO refresh_tokens
                (id, account_id, chain_id, token_hash, issued_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(record.id)
            .bind(record.account_id)
            .bind(record.chain_id)
            .bind(&record.token_hash)
            .bind(record.issued_at)
            .bind(record.expires_at)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert refresh token")?;
        Ok(())
    }

    async fn get(&self, token_hash: &[u8]) -> Result<Option<RefreshRecord>> {
        let query = format!("SELECT {TOKEN_COLUMNS} FROM refresh_tokens WHERE token_hash = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = %query
        );
        let record = sqlx::query_as::<_, RefreshRecord>(&query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to fetch refresh token")?;
        Ok(record)
    }

    async fn rotate(
        &self,
        presented_hash: &[u8],
        successor_id: Uuid,
        successor_hash: &[u8],
        successor_expires: DateTime<Utc>,
    ) -> Result<RotateOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin refresh rotation transaction")?;

        // The conditional update is the whole race: only one concurrent
        // caller sees rows_affected = 1.
        let query = format!(
            r"
            UPDATE refresh_tokens
            SET revoked_at = NOW(), replaced_by = $2
            WHERE token_hash = $1
              AND revoked_at IS NULL
              AND expires_at > NOW()
            RETURNING {TOKEN_COLUMNS}
            "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = %query
        );
        let previous = sqlx::query_as::<_, RefreshRecord>(&query)
            .bind(presented_hash)
            .bind(successor_id)
            .fetch_optional(&mut *tx)
            .instrument(span)
            .await
            .context("failed to rotate refresh token")?;

        let Some(previous) = previous else {
            let _ = tx.rollback().await;
            // Classify the loss for the caller: missing, revoked, or expired.
            return match self.get(presented_hash).await? {
                None => Ok(RotateOutcome::Missing),
                Some(record) if record.is_revoked() => Ok(RotateOutcome::Revoked {
                    chain_id: record.chain_id,
                }),
                Some(_) => Ok(RotateOutcome::Expired),
            };
        };

        let query = r"
            INSERT INTO refresh_tokens
                (id, account_id, chain_id, token_hash, issued_at, expires_at)
            VALUES ($1, $2, $3, $4, NOW(), $5)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(successor_id)
            .bind(previous.account_id)
            .bind(previous.chain_id)
            .bind(successor_hash)
            .bind(successor_expires)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to insert successor refresh token")?;

        tx.commit()
            .await
            .context("commit refresh rotation transaction")?;

        Ok(RotateOutcome::Rotated { previous })
    }

    async fn revoke(&self, token_hash: &[u8]) -> Result<bool> {
        let query = r"
            UPDATE refresh_tokens
            SET revoked_at = NOW()
            WHERE token_hash = $1 AND revoked_at IS NULL
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to revoke refresh token")?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_chain(&self, chain_id: Uuid) -> Result<u64> {
        let query = r"
            UPDATE refresh_tokens
            SET revoked_at = NOW()
            WHERE chain_id = $1 AND revoked_at IS NULL
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(chain_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to revoke refresh chain")?;
        Ok(result.rows_affected())
    }

    async fn revoke_all_for_account(&self, account_id: Uuid) -> Result<u64> {
        let query = r"
            UPDATE refresh_tokens
            SET revoked_at = NOW()
            WHERE account_id = $1 AND revoked_at IS NULL
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(account_id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to revoke account refresh tokens")?;
        Ok(result.rows_affected())
    }
}
