use gardisto::account::{Lifecycle, RegisterRequest};
use gardisto::config::AuthConfig;
use gardisto::otp::OtpEngine;
use gardisto::test_support::{
    InMemoryCredentialStore, InMemoryDeletionStore, InMemoryOtpStore, InMemoryTokenStore,
    RecordingDelivery, RecordingScheduler,
};
use gardisto::token::TokenService;
use secrecy::SecretString;
use std::sync::Arc;

pub struct Harness {
    pub lifecycle: Lifecycle,
    pub tokens: TokenService,
    pub accounts: Arc<InMemoryCredentialStore>,
    pub deletions: Arc<InMemoryDeletionStore>,
    pub scheduler: Arc<RecordingScheduler>,
    pub delivery: Arc<RecordingDelivery>,
}

pub fn test_config() -> AuthConfig {
    // no cooldown so tests can reissue codes freely
    AuthConfig::new(SecretString::from("test-secret")).with_otp_resend_cooldown_seconds(0)
}

pub fn harness(config: AuthConfig) -> Harness {
    let accounts = Arc::new(InMemoryCredentialStore::new());
    let deletions = Arc::new(InMemoryDeletionStore::new());
    let scheduler = Arc::new(RecordingScheduler::new());
    let delivery = Arc::new(RecordingDelivery::new());
    let otp = OtpEngine::new(
        Arc::new(InMemoryOtpStore::new()),
        delivery.clone(),
        config.clone(),
    );
    let tokens = TokenService::new(
        Arc::new(InMemoryTokenStore::new()),
        accounts.clone(),
        config.clone(),
    );
    let lifecycle = Lifecycle::new(
        accounts.clone(),
        deletions.clone(),
        scheduler.clone(),
        delivery.clone(),
        otp,
        tokens.clone(),
        config,
    );
    Harness {
        lifecycle,
        tokens,
        accounts,
        deletions,
        scheduler,
        delivery,
    }
}

pub fn register_request(email: &str) -> RegisterRequest {
    RegisterRequest {
        email: email.to_string(),
        full_name: "Test User".to_string(),
        password: SecretString::from("P@ss1234"),
    }
}
