//! Background loops: purge due deletion requests, sweep expired OTPs.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};

use super::DeletionStore;
use crate::account::Lifecycle;
use crate::error::Result;
use crate::otp::OtpEngine;

#[derive(Clone, Copy, Debug)]
pub struct PurgeWorkerConfig {
    poll_interval: Duration,
    batch_size: i64,
}

impl PurgeWorkerConfig {
    /// Default purge worker config: 60s poll interval, 20 accounts per batch.
    #[must_use]
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            batch_size: 20,
        }
    }

    #[must_use]
    pub fn with_poll_interval_seconds(mut self, seconds: u64) -> Self {
        self.poll_interval = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        let poll_interval = if self.poll_interval.is_zero() {
            Duration::from_secs(1)
        } else {
            self.poll_interval
        };
        Self {
            poll_interval,
            batch_size: self.batch_size.max(1),
        }
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub const fn batch_size(&self) -> i64 {
        self.batch_size
    }
}

impl Default for PurgeWorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a background task that purges accounts whose grace period elapsed.
/// Rides on `execute_scheduled_purge`, so a cancel that slipped in between
/// the poll and the purge is still honored.
pub fn spawn_purge_worker(
    lifecycle: Lifecycle,
    store: Arc<dyn DeletionStore>,
    config: PurgeWorkerConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let config = config.normalize();
        loop {
            if let Err(err) = purge_due_batch(&lifecycle, store.as_ref(), &config).await {
                error!("deletion purge batch failed: {err}");
            }
            sleep(config.poll_interval()).await;
        }
    })
}

async fn purge_due_batch(
    lifecycle: &Lifecycle,
    store: &dyn DeletionStore,
    config: &PurgeWorkerConfig,
) -> Result<usize> {
    let due = store
        .due_pending(chrono::Utc::now(), config.batch_size())
        .await?;
    let count = due.len();
    for request in due {
        if let Err(err) = lifecycle
            .execute_scheduled_purge(request.account_id, request.cancellation_token)
            .await
        {
            error!(
                account_id = %request.account_id,
                "scheduled purge failed: {err}"
            );
        }
    }
    if count > 0 {
        info!(count, "processed due deletion requests");
    }
    Ok(count)
}

/// Spawn a background task that deletes expired unconsumed OTP rows.
pub fn spawn_otp_cleanup_worker(
    engine: OtpEngine,
    poll_interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let poll_interval = if poll_interval.is_zero() {
            Duration::from_secs(60)
        } else {
            poll_interval
        };
        loop {
            match engine.purge_expired(chrono::Utc::now()).await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "purged expired otp codes"),
                Err(err) => error!("otp cleanup sweep failed: {err}"),
            }
            sleep(poll_interval).await;
        }
    })
}
