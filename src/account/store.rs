//! Credential store contract and its Postgres implementation.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::Instrument;
use uuid::Uuid;

use super::{Account, AccountStatus, NewAccount};
use crate::error::{Error, Result};

/// Durable account storage. `update_status` is conditional on the expected
/// current status so lifecycle transitions stay atomic under concurrency:
/// a mismatch fails with `Conflict`, never a silent overwrite.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Account>>;

    async fn get_by_email(&self, email: &str) -> Result<Option<Account>>;

    /// Create an account. Fails with `Conflict` when the email is taken.
    async fn create(&self, account: NewAccount) -> Result<Account>;

    /// Conditionally move an account from `expected` to `new_status`,
    /// stamping the matching lifecycle timestamp.
    async fn update_status(
        &self,
        id: Uuid,
        new_status: AccountStatus,
        expected: AccountStatus,
    ) -> Result<()>;

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> Result<()>;

    /// Whether a non-deleted SUPER_ADMIN exists (bootstrap guard).
    async fn super_admin_exists(&self) -> Result<bool>;

    /// Arm the one-time password-reset ticket for an account.
    async fn set_reset_ticket(
        &self,
        id: Uuid,
        ticket_hash: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Consume the reset ticket if it matches and is unexpired. Exactly-once:
    /// the winning caller gets `true`, every later caller `false`.
    async fn consume_reset_ticket(&self, id: Uuid, ticket_hash: &[u8]) -> Result<bool>;
}

const ACCOUNT_COLUMNS: &str = "id, email, full_name, password_hash, role, status::text AS status, \
     created_at, verified_at, disabled_at, delete_requested_at, deleted_at";

#[derive(Clone)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn get(&self, id: Uuid) -> Result<Option<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM users WHERE id = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = %query
        );
        let account = sqlx::query_as::<_, Account>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to fetch account by id")?;
        Ok(account)
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM users WHERE email = $1");
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = %query
        );
        let account = sqlx::query_as::<_, Account>(&query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to fetch account by email")?;
        Ok(account)
    }

    async fn create(&self, account: NewAccount) -> Result<Account> {
        let query = format!(
            r"
            INSERT INTO users (email, full_name, password_hash, role, status, verified_at)
            VALUES ($1, $2, $3, $4, $5, CASE WHEN $5 = 'active' THEN NOW() END)
            RETURNING {ACCOUNT_COLUMNS}
            "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = %query
        );
        let row = sqlx::query_as::<_, Account>(&query)
            .bind(&account.email)
            .bind(&account.full_name)
            .bind(&account.password_hash)
            .bind(account.role.as_str())
            .bind(account.status.as_str())
            .fetch_one(&self.pool)
            .instrument(span)
            .await;

        match row {
            Ok(created) => Ok(created),
            Err(err) if is_unique_violation(&err) => Err(Error::Conflict),
            Err(err) => Err(Error::Storage(
                anyhow::Error::new(err).context("failed to insert account"),
            )),
        }
    }

    async fn update_status(
        &self,
        id: Uuid,
        new_status: AccountStatus,
        expected: AccountStatus,
    ) -> Result<()> {
        // One conditional statement per target status so the matching
        // lifecycle timestamp is stamped in the same write.
        let query = match new_status {
            AccountStatus::PendingVerification => {
                "UPDATE users SET status = $1, updated_at = NOW() \
                 WHERE id = $2 AND status = $3"
            }
            AccountStatus::Active => {
                "UPDATE users SET status = $1, verified_at = COALESCE(verified_at, NOW()), \
                 disabled_at = NULL, delete_requested_at = NULL, updated_at = NOW() \
                 WHERE id = $2 AND status = $3"
            }
            AccountStatus::Disabled => {
                "UPDATE users SET status = $1, disabled_at = COALESCE(disabled_at, NOW()), \
                 delete_requested_at = NULL, updated_at = NOW() \
                 WHERE id = $2 AND status = $3"
            }
            AccountStatus::PendingDeletion => {
                "UPDATE users SET status = $1, delete_requested_at = NOW(), updated_at = NOW() \
                 WHERE id = $2 AND status = $3"
            }
            AccountStatus::Deleted => {
                "UPDATE users SET status = $1, deleted_at = NOW(), updated_at = NOW() \
                 WHERE id = $2 AND status = $3"
            }
        };
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(new_status.as_str())
            .bind(id)
            .bind(expected.as_str())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to update account status")?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        // The conditional write lost; report whether the account is missing
        // or the expected status no longer holds.
        match self.get(id).await? {
            Some(_) => Err(Error::Conflict),
            None => Err(Error::NotFound),
        }
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> Result<()> {
        let query = r"
            UPDATE users
            SET password_hash = $1,
                reset_ticket_hash = NULL,
                reset_ticket_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $2
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(password_hash)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to set password hash")?;
        if result.rows_affected() == 1 {
            Ok(())
        } else {
            Err(Error::NotFound)
        }
    }

    async fn super_admin_exists(&self) -> Result<bool> {
        let query = "SELECT 1 FROM users WHERE role = 'SUPER_ADMIN' AND status != 'deleted' LIMIT 1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to check for super admin")?;
        Ok(row.is_some())
    }

    async fn set_reset_ticket(
        &self,
        id: Uuid,
        ticket_hash: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let query = r"
            UPDATE users
            SET reset_ticket_hash = $1, reset_ticket_expires_at = $2, updated_at = NOW()
            WHERE id = $3
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(ticket_hash)
            .bind(expires_at)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to set reset ticket")?;
        if result.rows_affected() == 1 {
            Ok(())
        } else {
            Err(Error::NotFound)
        }
    }

    async fn consume_reset_ticket(&self, id: Uuid, ticket_hash: &[u8]) -> Result<bool> {
        // Single conditional update: only one concurrent consumer can win.
        let query = r"
            UPDATE users
            SET reset_ticket_hash = NULL, reset_ticket_expires_at = NULL, updated_at = NOW()
            WHERE id = $1
              AND reset_ticket_hash = $2
              AND reset_ticket_expires_at > NOW()
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id)
            .bind(ticket_hash)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to consume reset ticket")?;
        Ok(result.rows_affected() == 1)
    }
}
