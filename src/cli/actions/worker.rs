use crate::account::{store::PgCredentialStore, Lifecycle};
use crate::cli::actions::Action;
use crate::config::AuthConfig;
use crate::deletion::{
    spawn_otp_cleanup_worker, spawn_purge_worker, store::PgDeletionStore,
    worker::PurgeWorkerConfig, StoreBackedScheduler,
};
use crate::delivery::{spawn_outbox_worker, LogSender, OutboxDelivery, OutboxWorkerConfig};
use crate::otp::{store::PgOtpStore, OtpEngine};
use crate::token::{store::PgTokenStore, TokenService};
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Wire the service graph and run the background workers until ctrl-c.
pub async fn handle(action: Action) -> Result<()> {
    let Action::Worker {
        dsn,
        access_token_secret,
        issuer,
        purge_poll_seconds,
        outbox_poll_seconds,
        otp_cleanup_seconds,
    } = action;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&dsn)
        .await
        .context("failed to connect to the database")?;

    let config = AuthConfig::new(access_token_secret).with_issuer(issuer);

    let accounts = Arc::new(PgCredentialStore::new(pool.clone()));
    let deletions = Arc::new(PgDeletionStore::new(pool.clone()));
    let delivery = Arc::new(OutboxDelivery::new(pool.clone()));
    let otp = OtpEngine::new(
        Arc::new(PgOtpStore::new(pool.clone())),
        delivery.clone(),
        config.clone(),
    );
    let tokens = TokenService::new(
        Arc::new(PgTokenStore::new(pool.clone())),
        accounts.clone(),
        config.clone(),
    );
    let lifecycle = Lifecycle::new(
        accounts,
        deletions.clone(),
        Arc::new(StoreBackedScheduler),
        delivery,
        otp.clone(),
        tokens,
        config,
    );

    let outbox = spawn_outbox_worker(
        pool,
        Arc::new(LogSender),
        OutboxWorkerConfig::new().with_poll_interval_seconds(outbox_poll_seconds),
    );
    let purge = spawn_purge_worker(
        lifecycle,
        deletions,
        PurgeWorkerConfig::new().with_poll_interval_seconds(purge_poll_seconds),
    );
    let cleanup = spawn_otp_cleanup_worker(otp, Duration::from_secs(otp_cleanup_seconds));

    info!("workers started, waiting for shutdown signal");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");

    outbox.abort();
    purge.abort();
    cleanup.abort();

    Ok(())
}
