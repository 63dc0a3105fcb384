//! Account lifecycle state machine and the operations that drive it.
//!
//! Status moves only along pending_verification -> active -> disabled ->
//! pending_deletion -> deleted, with disable/enable and cancel-deletion as
//! the reversible edges. Every transition is a conditional store write, so
//! two racing operations settle with one winner and one `Conflict`.

use chrono::Utc;
use secrecy::SecretString;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::password::{enforce_policy, hash_password, verify_password};
use super::store::CredentialStore;
use super::{normalize_email, valid_email, Account, AccountStatus, NewAccount, Role};
use crate::authz;
use crate::config::AuthConfig;
use crate::deletion::{DeletionRequest, DeletionScheduler, DeletionStatus, DeletionStore};
use crate::delivery::Delivery;
use crate::error::{Error, Result};
use crate::otp::{OtpEngine, OtpPurpose};
use crate::token::{generate_refresh_token, hash_refresh_token, TokenPair, TokenService};

/// Authenticated caller identity, as established from an access token.
#[derive(Debug, Clone, Copy)]
pub struct Principal {
    pub id: Uuid,
    pub role: Role,
}

/// Input for self-service registration.
#[derive(Clone)]
pub struct RegisterRequest {
    pub email: String,
    pub full_name: String,
    pub password: SecretString,
}

#[derive(Clone)]
pub struct Lifecycle {
    accounts: Arc<dyn CredentialStore>,
    deletions: Arc<dyn DeletionStore>,
    scheduler: Arc<dyn DeletionScheduler>,
    delivery: Arc<dyn Delivery>,
    otp: OtpEngine,
    tokens: TokenService,
    config: AuthConfig,
}

impl Lifecycle {
    #[must_use]
    pub fn new(
        accounts: Arc<dyn CredentialStore>,
        deletions: Arc<dyn DeletionStore>,
        scheduler: Arc<dyn DeletionScheduler>,
        delivery: Arc<dyn Delivery>,
        otp: OtpEngine,
        tokens: TokenService,
        config: AuthConfig,
    ) -> Self {
        Self {
            accounts,
            deletions,
            scheduler,
            delivery,
            otp,
            tokens,
            config,
        }
    }

    /// Self-service registration: the account lands in pending_verification
    /// and a registration OTP goes out. `Conflict` when the email is taken.
    pub async fn register(&self, request: RegisterRequest) -> Result<Account> {
        let email = normalize_email(&request.email);
        if !valid_email(&email) {
            return Err(Error::Validation("invalid email address".to_string()));
        }
        let full_name = request.full_name.trim().to_string();
        if full_name.is_empty() {
            return Err(Error::Validation("full name must not be empty".to_string()));
        }
        enforce_policy(&request.password)?;
        let password_hash = hash_password(&request.password)?;

        let account = self
            .accounts
            .create(NewAccount {
                email,
                full_name,
                password_hash,
                role: Role::User,
                status: AccountStatus::PendingVerification,
            })
            .await?;

        self.otp.issue(&account, OtpPurpose::Registration).await?;
        info!(account_id = %account.id, "account registered, awaiting verification");
        Ok(account)
    }

    /// Bootstrap the first SUPER_ADMIN. Born active, no OTP round trip.
    /// `Conflict` once any non-deleted SUPER_ADMIN exists.
    pub async fn register_super_admin(&self, request: RegisterRequest) -> Result<Account> {
        if self.accounts.super_admin_exists().await? {
            return Err(Error::Conflict);
        }
        let email = normalize_email(&request.email);
        if !valid_email(&email) {
            return Err(Error::Validation("invalid email address".to_string()));
        }
        enforce_policy(&request.password)?;
        let password_hash = hash_password(&request.password)?;

        let account = self
            .accounts
            .create(NewAccount {
                email,
                full_name: request.full_name.trim().to_string(),
                password_hash,
                role: Role::SuperAdmin,
                status: AccountStatus::Active,
            })
            .await?;
        info!(account_id = %account.id, "super admin bootstrapped");
        Ok(account)
    }

    /// SUPER_ADMIN-only staff admin provisioning. The account is born active;
    /// the new admin is told out of band and rotates the password on first
    /// login via change_password.
    pub async fn create_staff_admin(
        &self,
        actor: Principal,
        request: RegisterRequest,
    ) -> Result<Account> {
        authz::may_create(actor.role, Role::StaffAdmin)?;
        let email = normalize_email(&request.email);
        if !valid_email(&email) {
            return Err(Error::Validation("invalid email address".to_string()));
        }
        enforce_policy(&request.password)?;
        let password_hash = hash_password(&request.password)?;

        let account = self
            .accounts
            .create(NewAccount {
                email,
                full_name: request.full_name.trim().to_string(),
                password_hash,
                role: Role::StaffAdmin,
                status: AccountStatus::Active,
            })
            .await?;

        self.notify(
            &account.email,
            "staff_admin_created",
            json!({ "full_name": account.full_name }),
        )
        .await;
        info!(account_id = %account.id, actor_id = %actor.id, "staff admin created");
        Ok(account)
    }

    /// Complete registration with the emailed OTP. The winning verification
    /// moves the account to active exactly once.
    pub async fn verify_registration(&self, email: &str, code: &str) -> Result<Account> {
        let account = self.visible_by_email(email).await?.ok_or(Error::NotFound)?;
        self.otp
            .verify(account.id, OtpPurpose::Registration, code)
            .await?;
        self.accounts
            .update_status(
                account.id,
                AccountStatus::Active,
                AccountStatus::PendingVerification,
            )
            .await?;

        self.notify(
            &account.email,
            "welcome",
            json!({ "full_name": account.full_name }),
        )
        .await;
        info!(account_id = %account.id, "registration verified");
        self.accounts.get(account.id).await?.ok_or(Error::NotFound)
    }

    /// Reissue the registration OTP. Only meaningful while the account still
    /// awaits verification.
    pub async fn resend_registration_otp(&self, email: &str) -> Result<()> {
        let account = self.visible_by_email(email).await?.ok_or(Error::NotFound)?;
        if account.status != AccountStatus::PendingVerification {
            return Err(Error::Conflict);
        }
        self.otp.issue(&account, OtpPurpose::Registration).await?;
        Ok(())
    }

    /// Password login. Unknown email, wrong password, and deleted accounts
    /// all collapse into `InvalidCredentials`; other non-login-capable
    /// statuses report `Forbidden` once the password checked out.
    pub async fn login(&self, email: &str, password: &SecretString) -> Result<(Account, TokenPair)> {
        let Some(account) = self.visible_by_email(email).await? else {
            return Err(Error::InvalidCredentials);
        };
        if !verify_password(password, &account.password_hash)? {
            warn!(security = true, account_id = %account.id, "login with wrong password");
            return Err(Error::InvalidCredentials);
        }
        match account.status {
            // pending_deletion keeps login so the owner can still cancel
            AccountStatus::Active | AccountStatus::PendingDeletion => {}
            _ => return Err(Error::Forbidden),
        }
        let pair = self.tokens.issue_pair(&account).await?;
        info!(account_id = %account.id, "login succeeded");
        Ok((account, pair))
    }

    /// Start a password reset. Deliberately opaque: the result is `Ok` even
    /// when the email is unknown or ineligible, so the endpoint cannot be
    /// used to enumerate accounts. Rate-limit hits are swallowed the same way.
    pub async fn request_password_reset(&self, email: &str) -> Result<()> {
        let Some(account) = self.visible_by_email(email).await? else {
            return Ok(());
        };
        if account.status != AccountStatus::Active {
            return Ok(());
        }
        match self.otp.issue(&account, OtpPurpose::PasswordReset).await {
            Ok(_) => Ok(()),
            Err(Error::RateLimited) => {
                warn!(security = true, account_id = %account.id, "password reset rate limited");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Exchange a valid reset OTP for a short-lived one-time reset ticket.
    /// The raw ticket goes to the caller; only its hash is stored.
    pub async fn verify_password_reset(&self, email: &str, code: &str) -> Result<String> {
        let account = self.visible_by_email(email).await?.ok_or(Error::NotFound)?;
        self.otp
            .verify(account.id, OtpPurpose::PasswordReset, code)
            .await?;

        let ticket = generate_refresh_token()?;
        let expires_at = Utc::now() + self.config.reset_ticket_ttl();
        self.accounts
            .set_reset_ticket(account.id, &hash_refresh_token(&ticket), expires_at)
            .await?;
        Ok(ticket)
    }

    /// Finish the reset: consume the ticket exactly once, store the new hash,
    /// and revoke every outstanding session.
    pub async fn reset_password(
        &self,
        email: &str,
        ticket: &str,
        new_password: &SecretString,
    ) -> Result<()> {
        let account = self
            .visible_by_email(email)
            .await?
            .ok_or(Error::InvalidToken)?;
        enforce_policy(new_password)?;
        if !self
            .accounts
            .consume_reset_ticket(account.id, &hash_refresh_token(ticket))
            .await?
        {
            return Err(Error::InvalidToken);
        }
        let password_hash = hash_password(new_password)?;
        self.accounts
            .set_password_hash(account.id, &password_hash)
            .await?;
        let revoked = self.tokens.revoke_all(account.id).await?;

        self.notify(&account.email, "password_changed", json!({})).await;
        info!(account_id = %account.id, revoked, "password reset completed");
        Ok(())
    }

    /// Authenticated password change. Requires the current password and
    /// revokes every outstanding session on success.
    pub async fn change_password(
        &self,
        account_id: Uuid,
        current_password: &SecretString,
        new_password: &SecretString,
    ) -> Result<()> {
        let account = self.visible(account_id).await?.ok_or(Error::NotFound)?;
        if !verify_password(current_password, &account.password_hash)? {
            return Err(Error::InvalidCredentials);
        }
        enforce_policy(new_password)?;
        let password_hash = hash_password(new_password)?;
        self.accounts
            .set_password_hash(account.id, &password_hash)
            .await?;
        let revoked = self.tokens.revoke_all(account.id).await?;

        self.notify(&account.email, "password_changed", json!({})).await;
        info!(account_id = %account.id, revoked, "password changed");
        Ok(())
    }

    /// Administratively disable an account. Idempotent when already disabled;
    /// any other non-active state rejects with `InvalidTransition`. Every
    /// outstanding session is revoked.
    pub async fn disable(&self, actor: Principal, target_id: Uuid) -> Result<()> {
        authz::require_role(actor.role, Role::StaffAdmin)?;
        let target = self.visible(target_id).await?.ok_or(Error::NotFound)?;
        authz::authorize(actor.id, actor.role, target.id, target.role)?;

        match target.status {
            AccountStatus::Disabled => return Ok(()),
            AccountStatus::Active => {}
            from => {
                return Err(Error::InvalidTransition {
                    from,
                    event: "admin_disable",
                })
            }
        }
        self.accounts
            .update_status(target.id, AccountStatus::Disabled, AccountStatus::Active)
            .await?;
        let revoked = self.tokens.revoke_all(target.id).await?;
        info!(account_id = %target.id, actor_id = %actor.id, revoked, "account disabled");
        Ok(())
    }

    /// Re-enable a disabled account. Idempotent when already active; any
    /// other non-disabled state rejects with `InvalidTransition`.
    pub async fn enable(&self, actor: Principal, target_id: Uuid) -> Result<()> {
        authz::require_role(actor.role, Role::StaffAdmin)?;
        let target = self.visible(target_id).await?.ok_or(Error::NotFound)?;
        authz::authorize(actor.id, actor.role, target.id, target.role)?;

        match target.status {
            AccountStatus::Active => return Ok(()),
            AccountStatus::Disabled => {}
            from => {
                return Err(Error::InvalidTransition {
                    from,
                    event: "admin_enable",
                })
            }
        }
        self.accounts
            .update_status(target.id, AccountStatus::Active, AccountStatus::Disabled)
            .await?;
        info!(account_id = %target.id, actor_id = %actor.id, "account enabled");
        Ok(())
    }

    /// Open a deletion request: the account moves to pending_deletion and a
    /// purge is scheduled for the end of the grace period.
    pub async fn request_deletion(
        &self,
        actor: Principal,
        target_id: Uuid,
    ) -> Result<DeletionRequest> {
        let target = self.visible(target_id).await?.ok_or(Error::NotFound)?;
        authz::authorize(actor.id, actor.role, target.id, target.role)?;

        let prior_status = match target.status {
            AccountStatus::Active | AccountStatus::Disabled => target.status,
            AccountStatus::PendingDeletion => return Err(Error::Conflict),
            from => return Err(Error::InvalidTransition {
                from,
                event: "request_deletion",
            }),
        };

        self.accounts
            .update_status(target.id, AccountStatus::PendingDeletion, prior_status)
            .await?;

        let now = Utc::now();
        let request = DeletionRequest {
            id: Uuid::new_v4(),
            account_id: target.id,
            prior_status,
            requested_at: now,
            grace_deadline: now + self.config.deletion_grace(),
            status: DeletionStatus::Pending,
            cancellation_token: Uuid::new_v4(),
            resolved_at: None,
        };
        self.deletions.create_pending(request.clone()).await?;
        self.scheduler
            .schedule_at(request.grace_deadline, target.id, request.cancellation_token)
            .await?;

        self.notify(
            &target.email,
            "deletion_requested",
            json!({ "grace_deadline": request.grace_deadline.to_rfc3339() }),
        )
        .await;
        info!(
            account_id = %target.id,
            actor_id = %actor.id,
            deadline = %request.grace_deadline,
            "deletion requested"
        );
        Ok(request)
    }

    /// Cancel a pending deletion and restore the pre-request status. Only
    /// valid inside the grace window; past the deadline the account belongs
    /// to the purge. The request is resolved before the status flips, so a
    /// cancel racing the scheduled purge settles with exactly one winner.
    pub async fn cancel_deletion(&self, actor: Principal, target_id: Uuid) -> Result<()> {
        let target = self.visible(target_id).await?.ok_or(Error::NotFound)?;
        authz::authorize(actor.id, actor.role, target.id, target.role)?;

        let pending = self
            .deletions
            .get_pending(target.id)
            .await?
            .ok_or(Error::NotFound)?;
        if Utc::now() > pending.grace_deadline {
            return Err(Error::Expired);
        }
        if !self
            .deletions
            .resolve(
                target.id,
                pending.cancellation_token,
                DeletionStatus::Cancelled,
            )
            .await?
        {
            return Err(Error::Conflict);
        }
        self.accounts
            .update_status(
                target.id,
                pending.prior_status,
                AccountStatus::PendingDeletion,
            )
            .await?;
        self.scheduler.cancel(pending.cancellation_token).await?;
        info!(account_id = %target.id, actor_id = %actor.id, "deletion cancelled");
        Ok(())
    }

    /// Confirm deletion without waiting out the grace period. Like cancel,
    /// only valid before the grace deadline; after that the scheduled purge
    /// owns the request.
    pub async fn confirm_deletion(&self, actor: Principal, target_id: Uuid) -> Result<()> {
        let target = self.visible(target_id).await?.ok_or(Error::NotFound)?;
        authz::authorize(actor.id, actor.role, target.id, target.role)?;

        let pending = self
            .deletions
            .get_pending(target.id)
            .await?
            .ok_or(Error::NotFound)?;
        if Utc::now() > pending.grace_deadline {
            return Err(Error::Expired);
        }
        if !self
            .deletions
            .resolve(
                target.id,
                pending.cancellation_token,
                DeletionStatus::Confirmed,
            )
            .await?
        {
            return Err(Error::Conflict);
        }
        self.scheduler.cancel(pending.cancellation_token).await?;
        self.purge(target.id, actor.id).await
    }

    /// Purge handler invoked when the grace period elapses. Idempotent and
    /// token-guarded: a fire whose cancellation token no longer matches the
    /// pending request (cancelled, already purged, superseded) is a no-op.
    pub async fn execute_scheduled_purge(
        &self,
        account_id: Uuid,
        cancellation_token: Uuid,
    ) -> Result<()> {
        if !self
            .deletions
            .resolve(account_id, cancellation_token, DeletionStatus::Confirmed)
            .await?
        {
            info!(%account_id, "stale purge fire ignored");
            return Ok(());
        }
        self.purge(account_id, account_id).await
    }

    async fn purge(&self, account_id: Uuid, actor_id: Uuid) -> Result<()> {
        self.accounts
            .update_status(
                account_id,
                AccountStatus::Deleted,
                AccountStatus::PendingDeletion,
            )
            .await?;
        let revoked = self.tokens.revoke_all(account_id).await?;
        info!(%account_id, %actor_id, revoked, "account purged");
        Ok(())
    }

    /// Fetch an account, treating deleted rows as absent.
    async fn visible(&self, id: Uuid) -> Result<Option<Account>> {
        Ok(self
            .accounts
            .get(id)
            .await?
            .filter(|account| !account.is_deleted()))
    }

    async fn visible_by_email(&self, email: &str) -> Result<Option<Account>> {
        Ok(self
            .accounts
            .get_by_email(&normalize_email(email))
            .await?
            .filter(|account| !account.is_deleted()))
    }

    /// Best-effort notification; a delivery failure never fails the flow.
    async fn notify(&self, to: &str, template: &str, context: serde_json::Value) {
        if let Err(err) = self.delivery.send_notification(to, template, context).await {
            error!(to = %to, template = %template, "failed to queue notification: {err}");
        }
    }
}
