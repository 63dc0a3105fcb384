//! Core configuration: every timeout and cap is independent and explicit.

use chrono::Duration;
use secrecy::SecretString;

const DEFAULT_OTP_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_OTP_CODE_LENGTH: usize = 6;
const DEFAULT_OTP_MAX_ATTEMPTS: i32 = 5;
const DEFAULT_OTP_RESEND_COOLDOWN_SECONDS: i64 = 60;
const DEFAULT_OTP_MAX_RESENDS: i32 = 5;
const DEFAULT_ACCESS_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_RESET_TICKET_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_DELETION_GRACE_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_ISSUER: &str = "gardisto";

/// Configuration for the OTP engine, token service, and lifecycle machine.
///
/// Built with defaults and adjusted through `with_*` methods, so tests can
/// shrink individual TTLs without touching the rest.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    access_token_secret: SecretString,
    issuer: String,
    otp_ttl_seconds: i64,
    otp_code_length: usize,
    otp_max_attempts: i32,
    otp_resend_cooldown_seconds: i64,
    otp_max_resends: i32,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
    reset_ticket_ttl_seconds: i64,
    deletion_grace_seconds: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(access_token_secret: SecretString) -> Self {
        Self {
            access_token_secret,
            issuer: DEFAULT_ISSUER.to_string(),
            otp_ttl_seconds: DEFAULT_OTP_TTL_SECONDS,
            otp_code_length: DEFAULT_OTP_CODE_LENGTH,
            otp_max_attempts: DEFAULT_OTP_MAX_ATTEMPTS,
            otp_resend_cooldown_seconds: DEFAULT_OTP_RESEND_COOLDOWN_SECONDS,
            otp_max_resends: DEFAULT_OTP_MAX_RESENDS,
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
            reset_ticket_ttl_seconds: DEFAULT_RESET_TICKET_TTL_SECONDS,
            deletion_grace_seconds: DEFAULT_DELETION_GRACE_SECONDS,
        }
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: String) -> Self {
        self.issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_otp_ttl_seconds(mut self, seconds: i64) -> Self {
        self.otp_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_otp_code_length(mut self, length: usize) -> Self {
        self.otp_code_length = length;
        self
    }

    #[must_use]
    pub fn with_otp_max_attempts(mut self, attempts: i32) -> Self {
        self.otp_max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_otp_resend_cooldown_seconds(mut self, seconds: i64) -> Self {
        self.otp_resend_cooldown_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_otp_max_resends(mut self, resends: i32) -> Self {
        self.otp_max_resends = resends;
        self
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_reset_ticket_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_ticket_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_deletion_grace_seconds(mut self, seconds: i64) -> Self {
        self.deletion_grace_seconds = seconds;
        self
    }

    #[must_use]
    pub fn access_token_secret(&self) -> &SecretString {
        &self.access_token_secret
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn otp_ttl(&self) -> Duration {
        Duration::seconds(self.otp_ttl_seconds)
    }

    #[must_use]
    pub const fn otp_code_length(&self) -> usize {
        self.otp_code_length
    }

    #[must_use]
    pub const fn otp_max_attempts(&self) -> i32 {
        self.otp_max_attempts
    }

    #[must_use]
    pub fn otp_resend_cooldown(&self) -> Duration {
        Duration::seconds(self.otp_resend_cooldown_seconds)
    }

    #[must_use]
    pub const fn otp_max_resends(&self) -> i32 {
        self.otp_max_resends
    }

    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        Duration::seconds(self.access_ttl_seconds)
    }

    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        Duration::seconds(self.refresh_ttl_seconds)
    }

    #[must_use]
    pub fn reset_ticket_ttl(&self) -> Duration {
        Duration::seconds(self.reset_ticket_ttl_seconds)
    }

    #[must_use]
    pub fn deletion_grace(&self) -> Duration {
        Duration::seconds(self.deletion_grace_seconds)
    }
}
