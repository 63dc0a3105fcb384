//! OTP engine: issuance with rate limits, constant-time verification with
//! attempt caps, exactly-once consumption.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

use super::{constant_time_eq, generate_code, generate_salt, hash_code, OtpPurpose, OtpRecord};
use super::store::OtpStore;
use crate::account::Account;
use crate::config::AuthConfig;
use crate::delivery::Delivery;
use crate::error::{Error, Result};

#[derive(Clone)]
pub struct OtpEngine {
    store: Arc<dyn OtpStore>,
    delivery: Arc<dyn Delivery>,
    config: AuthConfig,
}

impl OtpEngine {
    #[must_use]
    pub fn new(store: Arc<dyn OtpStore>, delivery: Arc<dyn Delivery>, config: AuthConfig) -> Self {
        Self {
            store,
            delivery,
            config,
        }
    }

    /// Issue a fresh code for the (account, purpose) pair, invalidating any
    /// prior active code.
    ///
    /// Fails with `RateLimited` inside the resend cooldown or once the resend
    /// cap for the current cycle is exhausted. Delivery is queued best-effort:
    /// a delivery failure does not roll back issuance, a resend recovers.
    pub async fn issue(&self, account: &Account, purpose: OtpPurpose) -> Result<OtpRecord> {
        let now = Utc::now();

        let resend_count = match self.store.latest(account.id, purpose).await? {
            Some(prev) => {
                if now - prev.created_at < self.config.otp_resend_cooldown() {
                    return Err(Error::RateLimited);
                }
                // The cycle ends when the previous code expires; until then
                // every reissue counts against the resend cap.
                if now < prev.expires_at {
                    let resend_count = prev.resend_count + 1;
                    if resend_count > self.config.otp_max_resends() {
                        warn!(
                            security = true,
                            account_id = %account.id,
                            purpose = %purpose,
                            "otp resend cap exceeded"
                        );
                        return Err(Error::RateLimited);
                    }
                    resend_count
                } else {
                    0
                }
            }
            None => 0,
        };

        let code = generate_code(self.config.otp_code_length());
        let salt = generate_salt();
        let record = OtpRecord {
            id: Uuid::new_v4(),
            account_id: account.id,
            purpose,
            code_hash: hash_code(&salt, &code),
            code_salt: salt,
            attempt_count: 0,
            resend_count,
            created_at: now,
            expires_at: now + self.config.otp_ttl(),
            consumed_at: None,
        };
        self.store.replace_active(record.clone()).await?;

        if let Err(err) = self
            .delivery
            .send_otp(&account.email, &code, purpose)
            .await
        {
            // Fire-and-forget: issuance stands, the resend path recovers.
            error!(account_id = %account.id, "failed to queue otp delivery: {err}");
        }

        Ok(record)
    }

    /// Verify a submitted code. Success consumes the record exactly once;
    /// replays fail with `NotFound`/`AlreadyUsed`.
    pub async fn verify(
        &self,
        account_id: Uuid,
        purpose: OtpPurpose,
        submitted_code: &str,
    ) -> Result<()> {
        let record = self
            .store
            .get_active(account_id, purpose)
            .await?
            .ok_or(Error::NotFound)?;

        if Utc::now() >= record.expires_at {
            return Err(Error::Expired);
        }

        let submitted_hash = hash_code(&record.code_salt, submitted_code);
        if !constant_time_eq(&submitted_hash, &record.code_hash) {
            // The increment is atomic in the store so two racing mismatches
            // cannot both read a pre-cap count.
            let attempts = self.store.record_failed_attempt(record.id).await?;
            if attempts >= self.config.otp_max_attempts() {
                self.store.invalidate(record.id).await?;
                warn!(
                    security = true,
                    account_id = %account_id,
                    purpose = %purpose,
                    attempts,
                    "otp attempt cap exceeded, code invalidated"
                );
                return Err(Error::TooManyAttempts);
            }
            return Err(Error::InvalidCode);
        }

        // Conditional consume: exactly one of two concurrent verifiers wins.
        if self.store.consume(record.id).await? {
            Ok(())
        } else {
            Err(Error::AlreadyUsed)
        }
    }

    /// Drop expired records; used by the background cleanup loop.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        self.store.delete_expired(now).await
    }
}
