//! Delivery collaborator: fire-and-forget OTP and notification dispatch.
//!
//! Core flows enqueue messages and move on; delivery failure never rolls back
//! the flow that produced it (a resend recovers from a lost OTP). The default
//! durable implementation is a transactional outbox: `OutboxDelivery` writes
//! `notification_outbox` rows and a background worker polls the table, locks
//! a batch via `FOR UPDATE SKIP LOCKED`, and hands each row to a
//! `NotificationSender`. Failed rows are retried with exponential backoff and
//! jitter until a max attempt threshold is reached, then marked `failed`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::Rng;
use serde_json::json;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::otp::OtpPurpose;

/// A queued outbound message.
#[derive(Clone, Debug)]
pub struct Notification {
    pub to: String,
    pub template: String,
    pub payload_json: String,
}

/// Async enqueue seam used by the OTP engine and lifecycle operations.
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Queue an OTP for delivery to `to`. Best effort.
    async fn send_otp(&self, to: &str, code: &str, purpose: OtpPurpose) -> Result<()>;

    /// Queue a templated notification. Best effort.
    async fn send_notification(
        &self,
        to: &str,
        template: &str,
        context: serde_json::Value,
    ) -> Result<()>;
}

/// Transport seam used by the outbox worker. The sender decides how to
/// deliver (SMTP, SMS gateway, API) and returns `Ok`/`Err`.
pub trait NotificationSender: Send + Sync {
    fn send(&self, notification: &Notification) -> Result<()>;
}

/// Local dev implementation that logs instead of sending.
#[derive(Clone, Debug)]
pub struct LogDelivery;

#[async_trait]
impl Delivery for LogDelivery {
    async fn send_otp(&self, to: &str, code: &str, purpose: OtpPurpose) -> Result<()> {
        info!(to = %to, code = %code, purpose = %purpose, "otp delivery stub");
        Ok(())
    }

    async fn send_notification(
        &self,
        to: &str,
        template: &str,
        context: serde_json::Value,
    ) -> Result<()> {
        info!(to = %to, template = %template, payload = %context, "notification delivery stub");
        Ok(())
    }
}

/// Local dev sender that logs the payload instead of delivering it.
#[derive(Clone, Debug)]
pub struct LogSender;

impl NotificationSender for LogSender {
    fn send(&self, notification: &Notification) -> Result<()> {
        info!(
            to = %notification.to,
            template = %notification.template,
            payload = %notification.payload_json,
            "notification outbox send stub"
        );
        Ok(())
    }
}

fn otp_template(purpose: OtpPurpose) -> &'static str {
    match purpose {
        OtpPurpose::Registration => "otp_registration",
        OtpPurpose::PasswordReset => "otp_password_reset",
    }
}

/// Durable delivery through the `notification_outbox` table.
#[derive(Clone)]
pub struct OutboxDelivery {
    pool: PgPool,
}

impl OutboxDelivery {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn enqueue(&self, to: &str, template: &str, payload: serde_json::Value) -> Result<()> {
        let payload_text =
            serde_json::to_string(&payload).context("failed to serialize notification payload")?;
        let query = r"
            INSERT INTO notification_outbox (to_address, template, payload_json)
            VALUES ($1, $2, $3::jsonb)
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(to)
            .bind(template)
            .bind(payload_text)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to insert notification outbox row")?;
        Ok(())
    }
}

#[async_trait]
impl Delivery for OutboxDelivery {
    async fn send_otp(&self, to: &str, code: &str, purpose: OtpPurpose) -> Result<()> {
        self.enqueue(
            to,
            otp_template(purpose),
            json!({ "code": code, "purpose": purpose.as_str() }),
        )
        .await
    }

    async fn send_notification(
        &self,
        to: &str,
        template: &str,
        context: serde_json::Value,
    ) -> Result<()> {
        self.enqueue(to, template, context).await
    }
}

#[derive(Clone, Copy, Debug)]
pub struct OutboxWorkerConfig {
    poll_interval: Duration,
    batch_size: usize,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl OutboxWorkerConfig {
    /// Default worker config: 5s poll interval, 10 messages per batch,
    /// 5 max attempts, and 5s->5m exponential backoff with jitter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
            max_attempts: 5,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
        }
    }

    #[must_use]
    pub fn with_poll_interval_seconds(mut self, seconds: u64) -> Self {
        self.poll_interval = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        let poll_interval = if self.poll_interval.is_zero() {
            Duration::from_secs(1)
        } else {
            self.poll_interval
        };
        let batch_size = self.batch_size.max(1);
        let max_attempts = self.max_attempts.max(1);
        let backoff_base = if self.backoff_base.is_zero() {
            Duration::from_secs(1)
        } else {
            self.backoff_base
        };
        let backoff_max = if self.backoff_max < backoff_base {
            backoff_base
        } else {
            self.backoff_max
        };
        Self {
            poll_interval,
            batch_size,
            max_attempts,
            backoff_base,
            backoff_max,
        }
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for OutboxWorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a background task that polls and processes the notification outbox.
pub fn spawn_outbox_worker(
    pool: PgPool,
    sender: Arc<dyn NotificationSender>,
    config: OutboxWorkerConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let config = config.normalize();
        let poll_interval = config.poll_interval();

        loop {
            if let Err(err) = process_outbox_batch(&pool, sender.as_ref(), &config).await {
                error!("notification outbox batch failed: {err}");
            }
            sleep(poll_interval).await;
        }
    })
}

async fn process_outbox_batch(
    pool: &PgPool,
    sender: &dyn NotificationSender,
    config: &OutboxWorkerConfig,
) -> Result<usize> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to start outbox transaction")?;

    // Grab a locked batch so multiple workers can run without double-sending.
    let query = r"
        SELECT id, to_address, template, payload_json::text AS payload_json, attempts
        FROM notification_outbox
        WHERE status = 'pending'
          AND next_attempt_at <= NOW()
        ORDER BY next_attempt_at ASC, created_at ASC
        LIMIT $1
        FOR UPDATE SKIP LOCKED
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(i64::try_from(config.batch_size()).unwrap_or(0))
        .fetch_all(&mut *tx)
        .instrument(span)
        .await
        .context("failed to load outbox batch")?;

    if rows.is_empty() {
        tx.commit()
            .await
            .context("failed to commit empty outbox batch")?;
        return Ok(0);
    }

    let row_count = rows.len();
    for row in rows {
        let id: Uuid = row.get("id");
        let attempts: i32 = row.get("attempts");
        let attempts = u32::try_from(attempts).unwrap_or(0);
        let notification = Notification {
            to: row.get("to_address"),
            template: row.get("template"),
            payload_json: row.get("payload_json"),
        };

        let send_result = sender.send(&notification);
        update_outbox_status(&mut tx, id, attempts, send_result, config).await?;
    }

    tx.commit()
        .await
        .context("failed to commit outbox batch")?;

    Ok(row_count)
}

async fn update_outbox_status(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: Uuid,
    attempts: u32,
    send_result: Result<()>,
    config: &OutboxWorkerConfig,
) -> Result<()> {
    let next_attempt = attempts.saturating_add(1);
    let next_attempts_i32 = i32::try_from(next_attempt).unwrap_or(i32::MAX);
    match send_result {
        Ok(()) => {
            let query = r"
                UPDATE notification_outbox
                SET status = 'sent',
                    attempts = $2,
                    last_error = NULL,
                    sent_at = NOW(),
                    next_attempt_at = NOW()
                WHERE id = $1
            ";
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            sqlx::query(query)
                .bind(id)
                .bind(next_attempts_i32)
                .execute(&mut **tx)
                .instrument(span)
                .await
                .context("failed to update outbox status to sent")?;
        }
        Err(err) => {
            if next_attempt >= config.max_attempts() {
                let query = r"
                    UPDATE notification_outbox
                    SET status = 'failed',
                        attempts = $2,
                        last_error = $3,
                        next_attempt_at = NOW()
                    WHERE id = $1
                ";
                let span = info_span!(
                    "db.query",
                    db.system = "postgresql",
                    db.operation = "UPDATE",
                    db.statement = query
                );
                sqlx::query(query)
                    .bind(id)
                    .bind(next_attempts_i32)
                    .bind(err.to_string())
                    .execute(&mut **tx)
                    .instrument(span)
                    .await
                    .context("failed to update outbox status to failed")?;
            } else {
                let delay =
                    backoff_delay(next_attempt, config.backoff_base, config.backoff_max);
                let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
                let query = r"
                    UPDATE notification_outbox
                    SET status = 'pending',
                        attempts = $2,
                        last_error = $3,
                        next_attempt_at = NOW() + ($4 * INTERVAL '1 millisecond')
                    WHERE id = $1
                ";
                let span = info_span!(
                    "db.query",
                    db.system = "postgresql",
                    db.operation = "UPDATE",
                    db.statement = query
                );
                sqlx::query(query)
                    .bind(id)
                    .bind(next_attempts_i32)
                    .bind(err.to_string())
                    .bind(delay_ms)
                    .execute(&mut **tx)
                    .instrument(span)
                    .await
                    .context("failed to update outbox retry schedule")?;
            }
        }
    }

    Ok(())
}

fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    let factor = 1u32 << shift;
    let delay = base.checked_mul(factor).unwrap_or(max);
    let capped = if delay > max { max } else { delay };
    jitter_delay(capped)
}

fn jitter_delay(delay: Duration) -> Duration {
    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if delay_ms < 2 {
        return delay;
    }
    let half = delay_ms / 2;
    let jitter = rand::thread_rng().gen_range(0..=half);
    Duration::from_millis(half + jitter)
}
