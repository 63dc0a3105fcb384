//! Deletion-request storage contract and its Postgres implementation.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::Instrument;
use uuid::Uuid;

use super::{DeletionRequest, DeletionStatus};
use crate::account::store::is_unique_violation;
use crate::error::{Error, Result};

/// Storage for deletion requests. At most one pending request per account;
/// `resolve` is a single conditional update keyed on the cancellation token
/// so a cancel and a purge racing each other settle exactly once.
#[async_trait]
pub trait DeletionStore: Send + Sync {
    /// Record a new pending request. `Conflict` if the account already has
    /// one pending.
    async fn create_pending(&self, request: DeletionRequest) -> Result<()>;

    async fn get_pending(&self, account_id: Uuid) -> Result<Option<DeletionRequest>>;

    /// Move the pending request carrying `cancellation_token` to `outcome`.
    /// Returns false when no such pending request exists, which is how a
    /// stale purge fire or a double cancel reports itself.
    async fn resolve(
        &self,
        account_id: Uuid,
        cancellation_token: Uuid,
        outcome: DeletionStatus,
    ) -> Result<bool>;

    /// Pending requests whose grace deadline has passed, oldest first.
    async fn due_pending(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<DeletionRequest>>;
}

const DELETION_COLUMNS: &str = "id, account_id, prior_status, requested_at, grace_deadline, \
                                status, cancellation_token, resolved_at";

#[derive(Clone)]
pub struct PgDeletionStore {
    pool: PgPool,
}

impl PgDeletionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeletionStore for PgDeletionStore {
    async fn create_pending(&self, request: DeletionRequest) -> Result<()> {
        // A partial unique index on (account_id) WHERE status = 'pending'
        // turns the duplicate-request race into a unique violation.
        let query = r"
            INSERT INTO deletion_requests
                (id, account_id, prior_status, requested_at, grace_deadline,
                 status, cancellation_token)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(request.id)
            .bind(request.account_id)
            .bind(request.prior_status.as_str())
            .bind(request.requested_at)
            .bind(request.grace_deadline)
            .bind(request.status.as_str())
            .bind(request.cancellation_token)
            .execute(&self.pool)
            .instrument(span)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(Error::Conflict),
            Err(err) => Err(Error::Storage(
                anyhow::Error::new(err).context("failed to insert deletion request"),
            )),
        }
    }

    async fn get_pending(&self, account_id: Uuid) -> Result<Option<DeletionRequest>> {
        let query = format!(
            "SELECT {DELETION_COLUMNS} FROM deletion_requests \
             WHERE account_id = $1 AND status = 'pending'"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = %query
        );
        let request = sqlx::query_as::<_, DeletionRequest>(&query)
            .bind(account_id)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to fetch pending deletion request")?;
        Ok(request)
    }

    async fn resolve(
        &self,
        account_id: Uuid,
        cancellation_token: Uuid,
        outcome: DeletionStatus,
    ) -> Result<bool> {
        let query = r"
            UPDATE deletion_requests
            SET status = $3, resolved_at = NOW()
            WHERE account_id = $1
              AND cancellation_token = $2
              AND status = 'pending'
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(account_id)
            .bind(cancellation_token)
            .bind(outcome.as_str())
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to resolve deletion request")?;
        Ok(result.rows_affected() == 1)
    }

    async fn due_pending(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<DeletionRequest>> {
        // Plain read: competing workers may pick up the same rows, and the
        // token-guarded conditional `resolve` lets exactly one of them win.
        let query = format!(
            "SELECT {DELETION_COLUMNS} FROM deletion_requests \
             WHERE status = 'pending' AND grace_deadline <= $1 \
             ORDER BY grace_deadline ASC \
             LIMIT $2"
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = %query
        );
        let due = sqlx::query_as::<_, DeletionRequest>(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to fetch due deletion requests")?;
        Ok(due)
    }
}
