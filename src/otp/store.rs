//! OTP storage contract and its Postgres implementation.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::Instrument;
use uuid::Uuid;

use super::{OtpPurpose, OtpRecord};
use crate::error::Result;

/// Storage for OTP records. Attempt increments and the consume step are
/// single conditional writes so concurrent verifiers cannot both pass the
/// attempt cap or both consume the same code.
#[async_trait]
pub trait OtpStore: Send + Sync {
    /// Insert a fresh record, invalidating any prior active record for the
    /// same (account, purpose) pair in the same atomic step.
    async fn replace_active(&self, record: OtpRecord) -> Result<()>;

    /// Latest unconsumed record for the pair, expired or not. Expiry is the
    /// engine's call so it can report `Expired` distinctly.
    async fn get_active(&self, account_id: Uuid, purpose: OtpPurpose)
        -> Result<Option<OtpRecord>>;

    /// Most recent record regardless of consumption, for cooldown and resend
    /// bookkeeping.
    async fn latest(&self, account_id: Uuid, purpose: OtpPurpose) -> Result<Option<OtpRecord>>;

    /// Atomically increment and return the new attempt count.
    async fn record_failed_attempt(&self, id: Uuid) -> Result<i32>;

    /// Mark the record consumed if it still is unconsumed. Returns whether
    /// this caller won the consume.
    async fn consume(&self, id: Uuid) -> Result<bool>;

    /// Invalidate a record (attempt cap exceeded); idempotent.
    async fn invalidate(&self, id: Uuid) -> Result<()>;

    /// Drop records that expired before `now`; returns how many were removed.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

#[derive(Clone)]
pub struct PgOtpStore {
    pool: PgPool,
}

impl PgOtpStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const OTP_COLUMNS: &str = "id, account_id, purpose::text AS purpose, code_salt, code_hash, \
     attempt_count, resend_count, created_at, expires_at, consumed_at";

#[async_trait]
impl OtpStore for PgOtpStore {
    async fn replace_active(&self, record: OtpRecord) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin otp replace transaction")?;

        // At most one active record per (account, purpose): retire the old
        // one before inserting the replacement.
        let query = r"
            UPDATE otps
            SET consumed_at = NOW()
            WHERE account_id = $1 AND purpose = $2 AND consumed_at IS NULL
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(record.account_id)
            .bind(record.purpose.as_str())
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to invalidate prior otp")?;

        let query = r"
            INSERT INTO otps
                (id, account_id, purpose, code_salt, code_hash,
                 attempt_count, resend_count, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
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
            .bind(record.purpose.as_str())
            .bind(&record.code_salt)
            .bind(&record.code_hash)
            .bind(record.attempt_count)
            .bind(record.resend_count)
            .bind(record.created_at)
            .bind(record.expires_at)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to insert otp")?;

        tx.commit().await.context("commit otp replace transaction")?;
        Ok(())
    }

    async fn get_active(
        &self,
        account_id: Uuid,
        purpose: OtpPurpose,
    ) -> Result<Option<OtpRecord>> {
        let query = format!(
            r"
            SELECT {OTP_COLUMNS}
            FROM otps
            WHERE account_id = $1 AND purpose = $2 AND consumed_at IS NULL
            ORDER BY created_at DESC
            LIMIT 1
            "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = %query
        );
        let record = sqlx::query_as::<_, OtpRecord>(&query)
            .bind(account_id)
            .bind(purpose.as_str())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to fetch active otp")?;
        Ok(record)
    }

    async fn latest(&self, account_id: Uuid, purpose: OtpPurpose) -> Result<Option<OtpRecord>> {
        let query = format!(
            r"
            SELECT {OTP_COLUMNS}
            FROM otps
            WHERE account_id = $1 AND purpose = $2
            ORDER BY created_at DESC
            LIMIT 1
            "
        );
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = %query
        );
        let record = sqlx::query_as::<_, OtpRecord>(&query)
            .bind(account_id)
            .bind(purpose.as_str())
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to fetch latest otp")?;
        Ok(record)
    }

    async fn record_failed_attempt(&self, id: Uuid) -> Result<i32> {
        let query = r"
            UPDATE otps
            SET attempt_count = attempt_count + 1
            WHERE id = $1
            RETURNING attempt_count
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let row: (i32,) = sqlx::query_as(query)
            .bind(id)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to record otp attempt")?;
        Ok(row.0)
    }

    async fn consume(&self, id: Uuid) -> Result<bool> {
        let query = r"
            UPDATE otps
            SET consumed_at = NOW()
            WHERE id = $1 AND consumed_at IS NULL
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to consume otp")?;
        Ok(result.rows_affected() == 1)
    }

    async fn invalidate(&self, id: Uuid) -> Result<()> {
        let query = r"
            UPDATE otps
            SET consumed_at = NOW()
            WHERE id = $1 AND consumed_at IS NULL
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to invalidate otp")?;
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let query = "DELETE FROM otps WHERE expires_at < $1";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(now)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to delete expired otps")?;
        Ok(result.rows_affected())
    }
}
