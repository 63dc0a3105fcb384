mod common;

use common::{harness, register_request, test_config};
use gardisto::config::AuthConfig;
use secrecy::SecretString;

fn config_with_cooldown() -> AuthConfig {
    AuthConfig::new(SecretString::from("test-secret"))
}

#[tokio::test]
async fn resend_inside_the_cooldown_is_rate_limited() {
    // default 60s cooldown
    let h = harness(config_with_cooldown());
    h.lifecycle
        .register(register_request("alice@example.com"))
        .await
        .unwrap();
    let err = h
        .lifecycle
        .resend_registration_otp("alice@example.com")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "rate_limited");
}

#[tokio::test]
async fn resend_cap_limits_reissues_within_a_cycle() {
    let h = harness(test_config().with_otp_max_resends(2));
    h.lifecycle
        .register(register_request("alice@example.com"))
        .await
        .unwrap();

    // two resends within the cap
    h.lifecycle
        .resend_registration_otp("alice@example.com")
        .await
        .unwrap();
    h.lifecycle
        .resend_registration_otp("alice@example.com")
        .await
        .unwrap();

    let err = h
        .lifecycle
        .resend_registration_otp("alice@example.com")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "rate_limited");
}

#[tokio::test]
async fn each_resend_invalidates_the_previous_code() {
    let h = harness(test_config());
    h.lifecycle
        .register(register_request("alice@example.com"))
        .await
        .unwrap();
    let first = h.delivery.last_code_for("alice@example.com").unwrap();

    h.lifecycle
        .resend_registration_otp("alice@example.com")
        .await
        .unwrap();
    let second = h.delivery.last_code_for("alice@example.com").unwrap();
    assert_ne!(first, second);

    // the superseded code no longer verifies
    let err = h
        .lifecycle
        .verify_registration("alice@example.com", &first)
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), "invalid_code" | "not_found"));

    h.lifecycle
        .verify_registration("alice@example.com", &second)
        .await
        .unwrap();
}

#[tokio::test]
async fn expired_code_is_reported_distinctly() {
    let h = harness(test_config().with_otp_ttl_seconds(0));
    h.lifecycle
        .register(register_request("alice@example.com"))
        .await
        .unwrap();
    let code = h.delivery.last_code_for("alice@example.com").unwrap();
    let err = h
        .lifecycle
        .verify_registration("alice@example.com", &code)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "expired");
}

#[tokio::test]
async fn codes_are_purpose_scoped() {
    let h = harness(test_config());
    h.lifecycle
        .register(register_request("alice@example.com"))
        .await
        .unwrap();
    let registration_code = h.delivery.last_code_for("alice@example.com").unwrap();
    h.lifecycle
        .verify_registration("alice@example.com", &registration_code)
        .await
        .unwrap();

    // a registration code opens no password-reset path
    let err = h
        .lifecycle
        .verify_password_reset("alice@example.com", &registration_code)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn reset_codes_only_issue_for_active_accounts() {
    let h = harness(test_config());
    h.lifecycle
        .register(register_request("alice@example.com"))
        .await
        .unwrap();
    let issued_during_registration = h.delivery.otps().len();

    // still pending verification: the request is opaque and sends nothing
    h.lifecycle
        .request_password_reset("alice@example.com")
        .await
        .unwrap();
    assert_eq!(h.delivery.otps().len(), issued_during_registration);
}

#[tokio::test]
async fn delivered_codes_have_the_configured_length() {
    let h = harness(test_config().with_otp_code_length(8));
    h.lifecycle
        .register(register_request("alice@example.com"))
        .await
        .unwrap();
    let code = h.delivery.last_code_for("alice@example.com").unwrap();
    assert_eq!(code.len(), 8);
    assert!(code.chars().all(|c| c.is_ascii_digit()));
}
