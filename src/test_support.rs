//! In-memory collaborator implementations for tests and local development.
//!
//! Each store guards its state with one mutex, so the conditional-write
//! contracts (exactly-once consume, rotate-on-use, token-guarded resolve)
//! hold under concurrency exactly as the Postgres implementations do.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::account::store::CredentialStore;
use crate::account::{Account, AccountStatus, NewAccount};
use crate::deletion::{DeletionRequest, DeletionScheduler, DeletionStatus, DeletionStore};
use crate::delivery::Delivery;
use crate::error::{Error, Result};
use crate::otp::store::OtpStore;
use crate::otp::{OtpPurpose, OtpRecord};
use crate::token::store::{RotateOutcome, TokenStore};
use crate::token::RefreshRecord;

#[derive(Default)]
struct CredentialState {
    accounts: HashMap<Uuid, Account>,
    reset_tickets: HashMap<Uuid, (Vec<u8>, DateTime<Utc>)>,
}

#[derive(Default)]
pub struct InMemoryCredentialStore {
    state: Mutex<CredentialState>,
}

impl InMemoryCredentialStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CredentialState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get(&self, id: Uuid) -> Result<Option<Account>> {
        Ok(self.lock().accounts.get(&id).cloned())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<Account>> {
        Ok(self
            .lock()
            .accounts
            .values()
            .find(|account| account.email == email)
            .cloned())
    }

    async fn create(&self, account: NewAccount) -> Result<Account> {
        let mut state = self.lock();
        if state
            .accounts
            .values()
            .any(|existing| existing.email == account.email)
        {
            return Err(Error::Conflict);
        }
        let now = Utc::now();
        let created = Account {
            id: Uuid::new_v4(),
            email: account.email,
            full_name: account.full_name,
            password_hash: account.password_hash,
            role: account.role,
            status: account.status,
            created_at: now,
            verified_at: (account.status == AccountStatus::Active).then_some(now),
            disabled_at: None,
            delete_requested_at: None,
            deleted_at: None,
        };
        state.accounts.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_status(
        &self,
        id: Uuid,
        new_status: AccountStatus,
        expected: AccountStatus,
    ) -> Result<()> {
        let mut state = self.lock();
        let Some(account) = state.accounts.get_mut(&id) else {
            return Err(Error::NotFound);
        };
        if account.status != expected {
            return Err(Error::Conflict);
        }
        let now = Utc::now();
        account.status = new_status;
        match new_status {
            AccountStatus::PendingVerification => {}
            AccountStatus::Active => {
                account.verified_at.get_or_insert(now);
                account.disabled_at = None;
                account.delete_requested_at = None;
            }
            AccountStatus::Disabled => {
                account.disabled_at.get_or_insert(now);
                account.delete_requested_at = None;
            }
            AccountStatus::PendingDeletion => {
                account.delete_requested_at = Some(now);
            }
            AccountStatus::Deleted => {
                account.deleted_at = Some(now);
            }
        }
        Ok(())
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> Result<()> {
        let mut state = self.lock();
        state.reset_tickets.remove(&id);
        let Some(account) = state.accounts.get_mut(&id) else {
            return Err(Error::NotFound);
        };
        account.password_hash = password_hash.to_string();
        Ok(())
    }

    async fn super_admin_exists(&self) -> Result<bool> {
        Ok(self.lock().accounts.values().any(|account| {
            account.role == crate::account::Role::SuperAdmin && !account.is_deleted()
        }))
    }

    async fn set_reset_ticket(
        &self,
        id: Uuid,
        ticket_hash: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.lock();
        if !state.accounts.contains_key(&id) {
            return Err(Error::NotFound);
        }
        state
            .reset_tickets
            .insert(id, (ticket_hash.to_vec(), expires_at));
        Ok(())
    }

    async fn consume_reset_ticket(&self, id: Uuid, ticket_hash: &[u8]) -> Result<bool> {
        let mut state = self.lock();
        let matches = state
            .reset_tickets
            .get(&id)
            .is_some_and(|(stored, expires_at)| {
                stored.as_slice() == ticket_hash && *expires_at > Utc::now()
            });
        if matches {
            state.reset_tickets.remove(&id);
        }
        Ok(matches)
    }
}

#[derive(Default)]
pub struct InMemoryOtpStore {
    records: Mutex<Vec<OtpRecord>>,
}

impl InMemoryOtpStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<OtpRecord>> {
        match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl OtpStore for InMemoryOtpStore {
    async fn replace_active(&self, record: OtpRecord) -> Result<()> {
        let mut records = self.lock();
        let now = Utc::now();
        for existing in records.iter_mut() {
            if existing.account_id == record.account_id
                && existing.purpose == record.purpose
                && existing.consumed_at.is_none()
            {
                existing.consumed_at = Some(now);
            }
        }
        records.push(record);
        Ok(())
    }

    async fn get_active(
        &self,
        account_id: Uuid,
        purpose: OtpPurpose,
    ) -> Result<Option<OtpRecord>> {
        Ok(self
            .lock()
            .iter()
            .filter(|record| {
                record.account_id == account_id
                    && record.purpose == purpose
                    && record.consumed_at.is_none()
            })
            .max_by_key(|record| record.created_at)
            .cloned())
    }

    async fn latest(&self, account_id: Uuid, purpose: OtpPurpose) -> Result<Option<OtpRecord>> {
        Ok(self
            .lock()
            .iter()
            .filter(|record| record.account_id == account_id && record.purpose == purpose)
            .max_by_key(|record| record.created_at)
            .cloned())
    }

    async fn record_failed_attempt(&self, id: Uuid) -> Result<i32> {
        let mut records = self.lock();
        let Some(record) = records.iter_mut().find(|record| record.id == id) else {
            return Err(Error::NotFound);
        };
        record.attempt_count += 1;
        Ok(record.attempt_count)
    }

    async fn consume(&self, id: Uuid) -> Result<bool> {
        let mut records = self.lock();
        let Some(record) = records
            .iter_mut()
            .find(|record| record.id == id && record.consumed_at.is_none())
        else {
            return Ok(false);
        };
        record.consumed_at = Some(Utc::now());
        Ok(true)
    }

    async fn invalidate(&self, id: Uuid) -> Result<()> {
        let mut records = self.lock();
        if let Some(record) = records.iter_mut().find(|record| record.id == id) {
            record.consumed_at.get_or_insert(Utc::now());
        }
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut records = self.lock();
        let before = records.len();
        records.retain(|record| record.consumed_at.is_some() || record.expires_at > now);
        Ok((before - records.len()) as u64)
    }
}

#[derive(Default)]
pub struct InMemoryTokenStore {
    records: Mutex<Vec<RefreshRecord>>,
}

impl InMemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RefreshRecord>> {
        match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn insert(&self, record: RefreshRecord) -> Result<()> {
        self.lock().push(record);
        Ok(())
    }

    async fn get(&self, token_hash: &[u8]) -> Result<Option<RefreshRecord>> {
        Ok(self
            .lock()
            .iter()
            .find(|record| record.token_hash == token_hash)
            .cloned())
    }

    async fn rotate(
        &self,
        presented_hash: &[u8],
        successor_id: Uuid,
        successor_hash: &[u8],
        successor_expires: DateTime<Utc>,
    ) -> Result<RotateOutcome> {
        let mut records = self.lock();
        let now = Utc::now();

        let Some(position) = records
            .iter()
            .position(|record| record.token_hash == presented_hash)
        else {
            return Ok(RotateOutcome::Missing);
        };
        if records[position].is_revoked() {
            return Ok(RotateOutcome::Revoked {
                chain_id: records[position].chain_id,
            });
        }
        if records[position].expires_at <= now {
            return Ok(RotateOutcome::Expired);
        }

        records[position].revoked_at = Some(now);
        records[position].replaced_by = Some(successor_id);
        let previous = records[position].clone();
        records.push(RefreshRecord {
            id: successor_id,
            account_id: previous.account_id,
            chain_id: previous.chain_id,
            token_hash: successor_hash.to_vec(),
            issued_at: now,
            expires_at: successor_expires,
            revoked_at: None,
            replaced_by: None,
        });
        Ok(RotateOutcome::Rotated { previous })
    }

    async fn revoke(&self, token_hash: &[u8]) -> Result<bool> {
        let mut records = self.lock();
        let Some(record) = records
            .iter_mut()
            .find(|record| record.token_hash == token_hash && !record.is_revoked())
        else {
            return Ok(false);
        };
        record.revoked_at = Some(Utc::now());
        Ok(true)
    }

    async fn revoke_chain(&self, chain_id: Uuid) -> Result<u64> {
        let mut records = self.lock();
        let now = Utc::now();
        let mut revoked = 0;
        for record in records.iter_mut() {
            if record.chain_id == chain_id && !record.is_revoked() {
                record.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn revoke_all_for_account(&self, account_id: Uuid) -> Result<u64> {
        let mut records = self.lock();
        let now = Utc::now();
        let mut revoked = 0;
        for record in records.iter_mut() {
            if record.account_id == account_id && !record.is_revoked() {
                record.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }
}

#[derive(Default)]
pub struct InMemoryDeletionStore {
    requests: Mutex<Vec<DeletionRequest>>,
}

impl InMemoryDeletionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<DeletionRequest>> {
        match self.requests.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl DeletionStore for InMemoryDeletionStore {
    async fn create_pending(&self, request: DeletionRequest) -> Result<()> {
        let mut requests = self.lock();
        if requests.iter().any(|existing| {
            existing.account_id == request.account_id
                && existing.status == DeletionStatus::Pending
        }) {
            return Err(Error::Conflict);
        }
        requests.push(request);
        Ok(())
    }

    async fn get_pending(&self, account_id: Uuid) -> Result<Option<DeletionRequest>> {
        Ok(self
            .lock()
            .iter()
            .find(|request| {
                request.account_id == account_id && request.status == DeletionStatus::Pending
            })
            .cloned())
    }

    async fn resolve(
        &self,
        account_id: Uuid,
        cancellation_token: Uuid,
        outcome: DeletionStatus,
    ) -> Result<bool> {
        let mut requests = self.lock();
        let Some(request) = requests.iter_mut().find(|request| {
            request.account_id == account_id
                && request.cancellation_token == cancellation_token
                && request.status == DeletionStatus::Pending
        }) else {
            return Ok(false);
        };
        request.status = outcome;
        request.resolved_at = Some(Utc::now());
        Ok(true)
    }

    async fn due_pending(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<DeletionRequest>> {
        let mut due: Vec<DeletionRequest> = self
            .lock()
            .iter()
            .filter(|request| {
                request.status == DeletionStatus::Pending && request.grace_deadline <= now
            })
            .cloned()
            .collect();
        due.sort_by_key(|request| request.grace_deadline);
        due.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(due)
    }
}

/// A scheduled purge as observed by the recording scheduler.
#[derive(Debug, Clone)]
pub struct ScheduledPurge {
    pub at: DateTime<Utc>,
    pub account_id: Uuid,
    pub cancellation_token: Uuid,
}

/// Scheduler that records schedule/cancel calls instead of arming anything.
#[derive(Default)]
pub struct RecordingScheduler {
    scheduled: Mutex<Vec<ScheduledPurge>>,
    cancelled: Mutex<Vec<Uuid>>,
}

impl RecordingScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn scheduled(&self) -> Vec<ScheduledPurge> {
        match self.scheduled.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    #[must_use]
    pub fn cancelled(&self) -> Vec<Uuid> {
        match self.cancelled.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl DeletionScheduler for RecordingScheduler {
    async fn schedule_at(
        &self,
        at: DateTime<Utc>,
        account_id: Uuid,
        cancellation_token: Uuid,
    ) -> Result<()> {
        if let Ok(mut scheduled) = self.scheduled.lock() {
            scheduled.push(ScheduledPurge {
                at,
                account_id,
                cancellation_token,
            });
        }
        Ok(())
    }

    async fn cancel(&self, cancellation_token: Uuid) -> Result<()> {
        if let Ok(mut cancelled) = self.cancelled.lock() {
            cancelled.push(cancellation_token);
        }
        Ok(())
    }
}

/// An OTP dispatch captured by the recording delivery.
#[derive(Debug, Clone)]
pub struct SentOtp {
    pub to: String,
    pub code: String,
    pub purpose: OtpPurpose,
}

/// A notification captured by the recording delivery.
#[derive(Debug, Clone)]
pub struct SentNotification {
    pub to: String,
    pub template: String,
    pub context: serde_json::Value,
}

/// Delivery that captures everything so tests can read the emitted codes.
#[derive(Default)]
pub struct RecordingDelivery {
    otps: Mutex<Vec<SentOtp>>,
    notifications: Mutex<Vec<SentNotification>>,
}

impl RecordingDelivery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn otps(&self) -> Vec<SentOtp> {
        match self.otps.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// The most recently delivered code for an address, if any.
    #[must_use]
    pub fn last_code_for(&self, to: &str) -> Option<String> {
        self.otps()
            .iter()
            .rev()
            .find(|sent| sent.to == to)
            .map(|sent| sent.code.clone())
    }

    #[must_use]
    pub fn notifications(&self) -> Vec<SentNotification> {
        match self.notifications.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Delivery for RecordingDelivery {
    async fn send_otp(&self, to: &str, code: &str, purpose: OtpPurpose) -> anyhow::Result<()> {
        if let Ok(mut otps) = self.otps.lock() {
            otps.push(SentOtp {
                to: to.to_string(),
                code: code.to_string(),
                purpose,
            });
        }
        Ok(())
    }

    async fn send_notification(
        &self,
        to: &str,
        template: &str,
        context: serde_json::Value,
    ) -> anyhow::Result<()> {
        if let Ok(mut notifications) = self.notifications.lock() {
            notifications.push(SentNotification {
                to: to.to_string(),
                template: template.to_string(),
                context,
            });
        }
        Ok(())
    }
}
