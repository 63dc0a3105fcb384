//! Two-phase account deletion: request -> grace period -> confirm/cancel.

pub mod store;
pub mod worker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};
use std::fmt;
use tracing::debug;
use uuid::Uuid;

pub use store::DeletionStore;
pub use worker::{spawn_otp_cleanup_worker, spawn_purge_worker};

use crate::account::AccountStatus;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl DeletionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the persisted `deletion_requests.status` textual value.
    pub fn from_db(value: &str) -> std::result::Result<Self, sqlx::Error> {
        match value {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(sqlx::Error::Decode(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid deletion_requests.status value: {value}"),
            )))),
        }
    }
}

impl fmt::Display for DeletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One deletion request. `prior_status` is what cancel restores;
/// `cancellation_token` ties the scheduled purge to this request so a stale
/// fire after cancel is a no-op.
#[derive(Debug, Clone)]
pub struct DeletionRequest {
    pub id: Uuid,
    pub account_id: Uuid,
    pub prior_status: AccountStatus,
    pub requested_at: DateTime<Utc>,
    pub grace_deadline: DateTime<Utc>,
    pub status: DeletionStatus,
    pub cancellation_token: Uuid,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for DeletionRequest {
    fn from_row(row: &'r PgRow) -> std::result::Result<Self, sqlx::Error> {
        let prior_status: String = row.try_get("prior_status")?;
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            prior_status: AccountStatus::from_db(&prior_status)?,
            requested_at: row.try_get("requested_at")?,
            grace_deadline: row.try_get("grace_deadline")?,
            status: DeletionStatus::from_db(&status)?,
            cancellation_token: row.try_get("cancellation_token")?,
            resolved_at: row.try_get("resolved_at")?,
        })
    }
}

/// Scheduler collaborator boundary. The external runner guarantees
/// at-least-once, not-before execution at the deadline; the purge handler is
/// idempotent so duplicate delivery is harmless.
#[async_trait]
pub trait DeletionScheduler: Send + Sync {
    async fn schedule_at(
        &self,
        at: DateTime<Utc>,
        account_id: Uuid,
        cancellation_token: Uuid,
    ) -> Result<()>;

    /// Invalidate a scheduled purge. Best effort: the handler re-checks the
    /// token anyway.
    async fn cancel(&self, cancellation_token: Uuid) -> Result<()>;
}

/// Scheduler for deployments where the deletion-request table itself is the
/// schedule: the purge worker polls for due pending rows, so there is nothing
/// separate to arm or disarm.
#[derive(Clone, Debug)]
pub struct StoreBackedScheduler;

#[async_trait]
impl DeletionScheduler for StoreBackedScheduler {
    async fn schedule_at(
        &self,
        at: DateTime<Utc>,
        account_id: Uuid,
        cancellation_token: Uuid,
    ) -> Result<()> {
        debug!(%account_id, %cancellation_token, deadline = %at, "purge due at deadline");
        Ok(())
    }

    async fn cancel(&self, cancellation_token: Uuid) -> Result<()> {
        debug!(%cancellation_token, "scheduled purge cancelled");
        Ok(())
    }
}
