mod common;

use common::{harness, register_request, test_config, Harness};
use gardisto::account::{Principal, Role};
use gardisto::token::TokenPair;
use secrecy::SecretString;

async fn logged_in(h: &Harness, email: &str) -> TokenPair {
    h.lifecycle.register(register_request(email)).await.unwrap();
    let code = h.delivery.last_code_for(email).unwrap();
    h.lifecycle.verify_registration(email, &code).await.unwrap();
    let (_, pair) = h
        .lifecycle
        .login(email, &SecretString::from("P@ss1234"))
        .await
        .unwrap();
    pair
}

#[tokio::test]
async fn refresh_rotates_the_token() {
    let h = harness(test_config());
    let pair = logged_in(&h, "alice@example.com").await;

    let rotated = h.tokens.refresh(&pair.refresh_token).await.unwrap();
    assert_ne!(rotated.refresh_token, pair.refresh_token);
    h.tokens.verify_access(&rotated.access_token).unwrap();

    // the successor keeps rotating
    h.tokens.refresh(&rotated.refresh_token).await.unwrap();
}

#[tokio::test]
async fn reuse_of_a_rotated_token_revokes_the_chain() {
    let h = harness(test_config());
    let pair = logged_in(&h, "alice@example.com").await;
    let rotated = h.tokens.refresh(&pair.refresh_token).await.unwrap();

    // presenting the spent token is treated as theft
    let err = h.tokens.refresh(&pair.refresh_token).await.unwrap_err();
    assert_eq!(err.kind(), "revoked");

    // the whole chain died with it, including the fresh successor
    let err = h.tokens.refresh(&rotated.refresh_token).await.unwrap_err();
    assert_eq!(err.kind(), "revoked");
}

#[tokio::test]
async fn concurrent_refreshes_settle_with_one_winner() {
    let h = harness(test_config());
    let pair = logged_in(&h, "alice@example.com").await;

    let (first, second) = tokio::join!(
        h.tokens.refresh(&pair.refresh_token),
        h.tokens.refresh(&pair.refresh_token),
    );
    let winners = usize::from(first.is_ok()) + usize::from(second.is_ok());
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn unknown_refresh_token_is_invalid() {
    let h = harness(test_config());
    let err = h.tokens.refresh("not-a-token").await.unwrap_err();
    assert_eq!(err.kind(), "invalid_token");
}

#[tokio::test]
async fn expired_refresh_token_is_reported_distinctly() {
    let h = harness(test_config().with_refresh_ttl_seconds(-10));
    let pair = logged_in(&h, "alice@example.com").await;
    let err = h.tokens.refresh(&pair.refresh_token).await.unwrap_err();
    assert_eq!(err.kind(), "token_expired");
}

#[tokio::test]
async fn disabled_account_cannot_refresh() {
    let h = harness(test_config());
    h.lifecycle
        .register(register_request("alice@example.com"))
        .await
        .unwrap();
    let code = h.delivery.last_code_for("alice@example.com").unwrap();
    let account = h
        .lifecycle
        .verify_registration("alice@example.com", &code)
        .await
        .unwrap();
    let (_, pair) = h
        .lifecycle
        .login("alice@example.com", &SecretString::from("P@ss1234"))
        .await
        .unwrap();
    let root = h
        .lifecycle
        .register_super_admin(register_request("root@example.com"))
        .await
        .unwrap();
    h.lifecycle
        .disable(
            Principal {
                id: root.id,
                role: root.role,
            },
            account.id,
        )
        .await
        .unwrap();

    // disable revoked everything, so the presented token reads as revoked
    let err = h.tokens.refresh(&pair.refresh_token).await.unwrap_err();
    assert_eq!(err.kind(), "revoked");
}

#[tokio::test]
async fn logout_revokes_exactly_that_token() {
    let h = harness(test_config());
    let pair = logged_in(&h, "alice@example.com").await;
    let other = h
        .lifecycle
        .login("alice@example.com", &SecretString::from("P@ss1234"))
        .await
        .unwrap()
        .1;

    h.tokens.revoke(&pair.refresh_token).await.unwrap();
    // revoking again is a no-op success
    h.tokens.revoke(&pair.refresh_token).await.unwrap();
    // unknown tokens fail
    assert_eq!(
        h.tokens.revoke("not-a-token").await.unwrap_err().kind(),
        "invalid_token"
    );

    assert!(h.tokens.refresh(&pair.refresh_token).await.is_err());
    // the other session is untouched
    h.tokens.refresh(&other.refresh_token).await.unwrap();
}

#[tokio::test]
async fn access_claims_carry_identity_and_role() {
    let h = harness(test_config());
    let root = h
        .lifecycle
        .register_super_admin(register_request("root@example.com"))
        .await
        .unwrap();
    let (_, pair) = h
        .lifecycle
        .login("root@example.com", &SecretString::from("P@ss1234"))
        .await
        .unwrap();

    let claims = h.tokens.verify_access(&pair.access_token).unwrap();
    assert_eq!(claims.account_id().unwrap(), root.id);
    assert_eq!(claims.role, Role::SuperAdmin);
    assert_eq!(claims.iss, "gardisto");

    // a forged token does not verify
    assert!(h.tokens.verify_access("forged.token.value").is_err());
}
