mod common;

use common::{harness, register_request, test_config, Harness};
use gardisto::account::{Account, AccountStatus, CredentialStore, Principal, Role};
use secrecy::SecretString;

fn wrong_code(code: &str) -> String {
    if code == "000000" {
        "000001".to_string()
    } else {
        "000000".to_string()
    }
}

async fn activate(h: &Harness, email: &str) -> Account {
    h.lifecycle.register(register_request(email)).await.unwrap();
    let code = h.delivery.last_code_for(email).unwrap();
    h.lifecycle.verify_registration(email, &code).await.unwrap()
}

async fn super_admin(h: &Harness) -> Principal {
    let admin = h
        .lifecycle
        .register_super_admin(register_request("root@example.com"))
        .await
        .unwrap();
    Principal {
        id: admin.id,
        role: admin.role,
    }
}

#[tokio::test]
async fn registration_lands_in_pending_verification() {
    let h = harness(test_config());
    let account = h
        .lifecycle
        .register(register_request(" Alice@Example.COM "))
        .await
        .unwrap();

    assert_eq!(account.email, "alice@example.com");
    assert_eq!(account.role, Role::User);
    assert_eq!(account.status, AccountStatus::PendingVerification);
    assert!(account.verified_at.is_none());
    // the registration code went out
    assert!(h.delivery.last_code_for("alice@example.com").is_some());
}

#[tokio::test]
async fn registration_rejects_bad_input() {
    let h = harness(test_config());

    let mut request = register_request("not-an-email");
    assert_eq!(
        h.lifecycle.register(request).await.unwrap_err().kind(),
        "validation_error"
    );

    request = register_request("weak@example.com");
    request.password = SecretString::from("weak");
    assert_eq!(
        h.lifecycle.register(request).await.unwrap_err().kind(),
        "validation_error"
    );
}

#[tokio::test]
async fn duplicate_email_conflicts() {
    let h = harness(test_config());
    h.lifecycle
        .register(register_request("alice@example.com"))
        .await
        .unwrap();
    let err = h
        .lifecycle
        .register(register_request("ALICE@example.com"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "conflict");
}

#[tokio::test]
async fn full_registration_flow_with_failed_attempts_and_resend() {
    let h = harness(test_config());
    h.lifecycle
        .register(register_request("alice@example.com"))
        .await
        .unwrap();
    let code = h.delivery.last_code_for("alice@example.com").unwrap();
    let bad = wrong_code(&code);

    // four mismatches stay under the cap
    for _ in 0..4 {
        let err = h
            .lifecycle
            .verify_registration("alice@example.com", &bad)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_code");
    }
    // fifth hits the cap and invalidates the code
    let err = h
        .lifecycle
        .verify_registration("alice@example.com", &bad)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "too_many_attempts");

    // even the right code is dead now
    let err = h
        .lifecycle
        .verify_registration("alice@example.com", &code)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");

    // resend issues a fresh code that completes the flow
    h.lifecycle
        .resend_registration_otp("alice@example.com")
        .await
        .unwrap();
    let fresh = h.delivery.last_code_for("alice@example.com").unwrap();
    assert_ne!(fresh, code);
    let account = h
        .lifecycle
        .verify_registration("alice@example.com", &fresh)
        .await
        .unwrap();
    assert_eq!(account.status, AccountStatus::Active);
    assert!(account.verified_at.is_some());

    // welcome notification queued
    assert!(h
        .delivery
        .notifications()
        .iter()
        .any(|sent| sent.template == "welcome"));
}

#[tokio::test]
async fn verification_code_is_single_use() {
    let h = harness(test_config());
    h.lifecycle
        .register(register_request("alice@example.com"))
        .await
        .unwrap();
    let code = h.delivery.last_code_for("alice@example.com").unwrap();
    h.lifecycle
        .verify_registration("alice@example.com", &code)
        .await
        .unwrap();

    let err = h
        .lifecycle
        .verify_registration("alice@example.com", &code)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn login_collapses_failures_into_invalid_credentials() {
    let h = harness(test_config());
    activate(&h, "alice@example.com").await;

    let err = h
        .lifecycle
        .login("ghost@example.com", &SecretString::from("P@ss1234"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_credentials");

    let err = h
        .lifecycle
        .login("alice@example.com", &SecretString::from("Wr0ng!pw"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_credentials");

    let (account, pair) = h
        .lifecycle
        .login("alice@example.com", &SecretString::from("P@ss1234"))
        .await
        .unwrap();
    assert_eq!(account.status, AccountStatus::Active);
    let claims = h.tokens.verify_access(&pair.access_token).unwrap();
    assert_eq!(claims.account_id().unwrap(), account.id);
}

#[tokio::test]
async fn unverified_account_cannot_log_in() {
    let h = harness(test_config());
    h.lifecycle
        .register(register_request("alice@example.com"))
        .await
        .unwrap();
    let err = h
        .lifecycle
        .login("alice@example.com", &SecretString::from("P@ss1234"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "forbidden");
}

#[tokio::test]
async fn super_admin_bootstrap_is_one_shot() {
    let h = harness(test_config());
    let admin = h
        .lifecycle
        .register_super_admin(register_request("root@example.com"))
        .await
        .unwrap();
    assert_eq!(admin.role, Role::SuperAdmin);
    assert_eq!(admin.status, AccountStatus::Active);

    let err = h
        .lifecycle
        .register_super_admin(register_request("other@example.com"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "conflict");
}

#[tokio::test]
async fn staff_admin_creation_is_super_admin_only() {
    let h = harness(test_config());
    let root = super_admin(&h).await;

    let staff = h
        .lifecycle
        .create_staff_admin(root, register_request("staff@example.com"))
        .await
        .unwrap();
    assert_eq!(staff.role, Role::StaffAdmin);
    assert_eq!(staff.status, AccountStatus::Active);

    let staff_principal = Principal {
        id: staff.id,
        role: staff.role,
    };
    let err = h
        .lifecycle
        .create_staff_admin(staff_principal, register_request("more@example.com"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "forbidden");
}

#[tokio::test]
async fn password_reset_flow() {
    let h = harness(test_config());
    let account = activate(&h, "alice@example.com").await;
    let (_, pair) = h
        .lifecycle
        .login("alice@example.com", &SecretString::from("P@ss1234"))
        .await
        .unwrap();

    h.lifecycle
        .request_password_reset("alice@example.com")
        .await
        .unwrap();
    let code = h.delivery.last_code_for("alice@example.com").unwrap();
    let ticket = h
        .lifecycle
        .verify_password_reset("alice@example.com", &code)
        .await
        .unwrap();

    h.lifecycle
        .reset_password(
            "alice@example.com",
            &ticket,
            &SecretString::from("N3w!pass"),
        )
        .await
        .unwrap();

    // ticket is single use
    let err = h
        .lifecycle
        .reset_password(
            "alice@example.com",
            &ticket,
            &SecretString::from("N3w!pass"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_token");

    // old password is gone, sessions are revoked
    assert_eq!(
        h.lifecycle
            .login("alice@example.com", &SecretString::from("P@ss1234"))
            .await
            .unwrap_err()
            .kind(),
        "invalid_credentials"
    );
    assert_eq!(
        h.tokens.refresh(&pair.refresh_token).await.unwrap_err().kind(),
        "revoked"
    );
    let (after, _) = h
        .lifecycle
        .login("alice@example.com", &SecretString::from("N3w!pass"))
        .await
        .unwrap();
    assert_eq!(after.id, account.id);
}

#[tokio::test]
async fn password_reset_is_opaque_for_unknown_accounts() {
    let h = harness(test_config());
    h.lifecycle
        .request_password_reset("ghost@example.com")
        .await
        .unwrap();
    assert!(h.delivery.otps().is_empty());
}

#[tokio::test]
async fn change_password_requires_current_password() {
    let h = harness(test_config());
    let account = activate(&h, "alice@example.com").await;
    let (_, pair) = h
        .lifecycle
        .login("alice@example.com", &SecretString::from("P@ss1234"))
        .await
        .unwrap();

    let err = h
        .lifecycle
        .change_password(
            account.id,
            &SecretString::from("Wr0ng!pw"),
            &SecretString::from("N3w!pass"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_credentials");

    h.lifecycle
        .change_password(
            account.id,
            &SecretString::from("P@ss1234"),
            &SecretString::from("N3w!pass"),
        )
        .await
        .unwrap();

    // every outstanding session is revoked
    assert_eq!(
        h.tokens.refresh(&pair.refresh_token).await.unwrap_err().kind(),
        "revoked"
    );
}

#[tokio::test]
async fn disable_and_enable_round_trip() {
    let h = harness(test_config());
    let root = super_admin(&h).await;
    let user = activate(&h, "alice@example.com").await;
    let (_, pair) = h
        .lifecycle
        .login("alice@example.com", &SecretString::from("P@ss1234"))
        .await
        .unwrap();

    h.lifecycle.disable(root, user.id).await.unwrap();
    // idempotent
    h.lifecycle.disable(root, user.id).await.unwrap();

    assert_eq!(
        h.lifecycle
            .login("alice@example.com", &SecretString::from("P@ss1234"))
            .await
            .unwrap_err()
            .kind(),
        "forbidden"
    );
    assert_eq!(
        h.tokens.refresh(&pair.refresh_token).await.unwrap_err().kind(),
        "revoked"
    );

    h.lifecycle.enable(root, user.id).await.unwrap();
    h.lifecycle.enable(root, user.id).await.unwrap();
    h.lifecycle
        .login("alice@example.com", &SecretString::from("P@ss1234"))
        .await
        .unwrap();
}

#[tokio::test]
async fn staff_admin_cannot_touch_admin_accounts() {
    let h = harness(test_config());
    let root = super_admin(&h).await;
    let staff = h
        .lifecycle
        .create_staff_admin(root, register_request("staff@example.com"))
        .await
        .unwrap();
    let staff_principal = Principal {
        id: staff.id,
        role: staff.role,
    };

    assert_eq!(
        h.lifecycle
            .disable(staff_principal, root.id)
            .await
            .unwrap_err()
            .kind(),
        "forbidden"
    );

    // but super admin can disable a staff admin
    h.lifecycle.disable(root, staff.id).await.unwrap();
}

#[tokio::test]
async fn users_cannot_disable_anyone() {
    let h = harness(test_config());
    let alice = activate(&h, "alice@example.com").await;
    let bob = activate(&h, "bob@example.com").await;
    let principal = Principal {
        id: alice.id,
        role: alice.role,
    };
    assert_eq!(
        h.lifecycle
            .disable(principal, bob.id)
            .await
            .unwrap_err()
            .kind(),
        "forbidden"
    );
    // not even themselves: disable is an admin operation
    assert_eq!(
        h.lifecycle
            .disable(principal, alice.id)
            .await
            .unwrap_err()
            .kind(),
        "forbidden"
    );
}

#[tokio::test]
async fn deletion_request_schedules_a_purge() {
    let h = harness(test_config());
    let user = activate(&h, "alice@example.com").await;
    let principal = Principal {
        id: user.id,
        role: user.role,
    };

    let request = h.lifecycle.request_deletion(principal, user.id).await.unwrap();
    let account = h.accounts.get(user.id).await.unwrap().unwrap();
    assert_eq!(account.status, AccountStatus::PendingDeletion);

    let scheduled = h.scheduler.scheduled();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].account_id, user.id);
    assert_eq!(scheduled[0].cancellation_token, request.cancellation_token);

    // a second request while one is open conflicts
    assert_eq!(
        h.lifecycle
            .request_deletion(principal, user.id)
            .await
            .unwrap_err()
            .kind(),
        "conflict"
    );
}

#[tokio::test]
async fn cancelled_deletion_survives_a_stale_purge_fire() {
    let h = harness(test_config());
    let user = activate(&h, "alice@example.com").await;
    let principal = Principal {
        id: user.id,
        role: user.role,
    };

    let request = h.lifecycle.request_deletion(principal, user.id).await.unwrap();
    h.lifecycle.cancel_deletion(principal, user.id).await.unwrap();

    let account = h.accounts.get(user.id).await.unwrap().unwrap();
    assert_eq!(account.status, AccountStatus::Active);
    assert_eq!(h.scheduler.cancelled(), vec![request.cancellation_token]);

    // the scheduler fires anyway with the stale token: nothing happens
    h.lifecycle
        .execute_scheduled_purge(user.id, request.cancellation_token)
        .await
        .unwrap();
    let account = h.accounts.get(user.id).await.unwrap().unwrap();
    assert_eq!(account.status, AccountStatus::Active);
}

#[tokio::test]
async fn cancel_restores_prior_status_for_disabled_accounts() {
    let h = harness(test_config());
    let root = super_admin(&h).await;
    let user = activate(&h, "alice@example.com").await;

    h.lifecycle.disable(root, user.id).await.unwrap();
    h.lifecycle.request_deletion(root, user.id).await.unwrap();
    h.lifecycle.cancel_deletion(root, user.id).await.unwrap();

    let account = h.accounts.get(user.id).await.unwrap().unwrap();
    assert_eq!(account.status, AccountStatus::Disabled);
}

#[tokio::test]
async fn scheduled_purge_is_idempotent() {
    let h = harness(test_config());
    let user = activate(&h, "alice@example.com").await;
    let principal = Principal {
        id: user.id,
        role: user.role,
    };
    let (_, pair) = h
        .lifecycle
        .login("alice@example.com", &SecretString::from("P@ss1234"))
        .await
        .unwrap();

    let request = h.lifecycle.request_deletion(principal, user.id).await.unwrap();
    h.lifecycle
        .execute_scheduled_purge(user.id, request.cancellation_token)
        .await
        .unwrap();
    // duplicate delivery is a no-op
    h.lifecycle
        .execute_scheduled_purge(user.id, request.cancellation_token)
        .await
        .unwrap();

    let account = h.accounts.get(user.id).await.unwrap().unwrap();
    assert_eq!(account.status, AccountStatus::Deleted);

    // the deleted account is invisible and its sessions are dead
    assert_eq!(
        h.lifecycle
            .login("alice@example.com", &SecretString::from("P@ss1234"))
            .await
            .unwrap_err()
            .kind(),
        "invalid_credentials"
    );
    assert!(h.tokens.refresh(&pair.refresh_token).await.is_err());
}

#[tokio::test]
async fn explicit_confirm_skips_the_grace_period() {
    let h = harness(test_config());
    let user = activate(&h, "alice@example.com").await;
    let principal = Principal {
        id: user.id,
        role: user.role,
    };

    h.lifecycle.request_deletion(principal, user.id).await.unwrap();
    h.lifecycle.confirm_deletion(principal, user.id).await.unwrap();

    let account = h.accounts.get(user.id).await.unwrap().unwrap();
    assert_eq!(account.status, AccountStatus::Deleted);

    // nothing left to cancel
    assert_eq!(
        h.lifecycle
            .cancel_deletion(principal, user.id)
            .await
            .unwrap_err()
            .kind(),
        "not_found"
    );
}

#[tokio::test]
async fn deletion_requires_an_eligible_status() {
    let h = harness(test_config());
    h.lifecycle
        .register(register_request("alice@example.com"))
        .await
        .unwrap();
    let account = h
        .accounts
        .get_by_email("alice@example.com")
        .await
        .unwrap()
        .unwrap();
    let principal = Principal {
        id: account.id,
        role: account.role,
    };
    let err = h
        .lifecycle
        .request_deletion(principal, account.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_transition");
}

#[tokio::test]
async fn disable_and_enable_reject_unlisted_transitions() {
    let h = harness(test_config());
    let root = super_admin(&h).await;

    // still pending verification: neither edge exists
    h.lifecycle
        .register(register_request("alice@example.com"))
        .await
        .unwrap();
    let pending = h
        .accounts
        .get_by_email("alice@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        h.lifecycle
            .disable(root, pending.id)
            .await
            .unwrap_err()
            .kind(),
        "invalid_transition"
    );
    assert_eq!(
        h.lifecycle
            .enable(root, pending.id)
            .await
            .unwrap_err()
            .kind(),
        "invalid_transition"
    );

    // pending deletion is owned by the deletion flow
    let user = activate(&h, "bob@example.com").await;
    let principal = Principal {
        id: user.id,
        role: user.role,
    };
    h.lifecycle.request_deletion(principal, user.id).await.unwrap();
    assert_eq!(
        h.lifecycle.disable(root, user.id).await.unwrap_err().kind(),
        "invalid_transition"
    );
    assert_eq!(
        h.lifecycle.enable(root, user.id).await.unwrap_err().kind(),
        "invalid_transition"
    );
}

#[tokio::test]
async fn cancel_and_confirm_close_at_the_grace_deadline() {
    let h = harness(test_config().with_deletion_grace_seconds(-10));
    let user = activate(&h, "alice@example.com").await;
    let principal = Principal {
        id: user.id,
        role: user.role,
    };
    let request = h.lifecycle.request_deletion(principal, user.id).await.unwrap();

    // deadline already passed: the account belongs to the purge now
    assert_eq!(
        h.lifecycle
            .cancel_deletion(principal, user.id)
            .await
            .unwrap_err()
            .kind(),
        "expired"
    );
    assert_eq!(
        h.lifecycle
            .confirm_deletion(principal, user.id)
            .await
            .unwrap_err()
            .kind(),
        "expired"
    );

    h.lifecycle
        .execute_scheduled_purge(user.id, request.cancellation_token)
        .await
        .unwrap();
    let account = h.accounts.get(user.id).await.unwrap().unwrap();
    assert_eq!(account.status, AccountStatus::Deleted);
}

#[tokio::test]
async fn users_cannot_delete_other_accounts() {
    let h = harness(test_config());
    let alice = activate(&h, "alice@example.com").await;
    let bob = activate(&h, "bob@example.com").await;
    let principal = Principal {
        id: alice.id,
        role: alice.role,
    };
    assert_eq!(
        h.lifecycle
            .request_deletion(principal, bob.id)
            .await
            .unwrap_err()
            .kind(),
        "forbidden"
    );
}
