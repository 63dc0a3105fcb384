//! Account model: roles, lifecycle status, and the durable record.

pub mod lifecycle;
pub mod password;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};
use std::fmt;
use uuid::Uuid;

pub use lifecycle::{Lifecycle, Principal, RegisterRequest};
pub use store::CredentialStore;

/// Closed set of roles. Privilege comparisons go through the rank table in
/// `authz`, never through dynamic dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    StaffAdmin,
    SuperAdmin,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::StaffAdmin => "STAFF_ADMIN",
            Self::SuperAdmin => "SUPER_ADMIN",
        }
    }

    /// Parse the persisted `users.role` textual value into a typed enum.
    pub fn from_db(value: &str) -> Result<Self, sqlx::Error> {
        match value {
            "USER" => Ok(Self::User),
            "STAFF_ADMIN" => Ok(Self::StaffAdmin),
            "SUPER_ADMIN" => Ok(Self::SuperAdmin),
            _ => Err(sqlx::Error::Decode(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid users.role value: {value}"),
            )))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-account lifecycle status. Transitions are total-ordered and enforced
/// by `Lifecycle`; nothing else mutates this field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    PendingVerification,
    Active,
    Disabled,
    PendingDeletion,
    Deleted,
}

impl AccountStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingVerification => "pending_verification",
            Self::Active => "active",
            Self::Disabled => "disabled",
            Self::PendingDeletion => "pending_deletion",
            Self::Deleted => "deleted",
        }
    }

    /// Parse the persisted `users.status` textual value into a typed enum.
    pub fn from_db(value: &str) -> Result<Self, sqlx::Error> {
        match value {
            "pending_verification" => Ok(Self::PendingVerification),
            "active" => Ok(Self::Active),
            "disabled" => Ok(Self::Disabled),
            "pending_deletion" => Ok(Self::PendingDeletion),
            "deleted" => Ok(Self::Deleted),
            _ => Err(sqlx::Error::Decode(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid users.status value: {value}"),
            )))),
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable account record owned by the credential store.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub role: Role,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub disabled_at: Option<DateTime<Utc>>,
    pub delete_requested_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Account {
    /// Deleted accounts are invisible to every flow; callers get `NotFound`
    /// semantics instead of a status hint.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        matches!(self.status, AccountStatus::Deleted)
    }
}

impl<'r> FromRow<'r, PgRow> for Account {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let role: String = row.try_get("role")?;
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            full_name: row.try_get("full_name")?,
            password_hash: row.try_get("password_hash")?,
            role: Role::from_db(&role)?,
            status: AccountStatus::from_db(&status)?,
            created_at: row.try_get("created_at")?,
            verified_at: row.try_get("verified_at")?,
            disabled_at: row.try_get("disabled_at")?,
            delete_requested_at: row.try_get("delete_requested_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }
}

/// Fields required to create a new account row.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub role: Role,
    pub status: AccountStatus,
}

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    static EMAIL_FORMAT: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    EMAIL_FORMAT
        .get_or_init(|| {
            regex::Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern compiles")
        })
        .is_match(email_normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_db_text() {
        for role in [Role::User, Role::StaffAdmin, Role::SuperAdmin] {
            assert_eq!(Role::from_db(role.as_str()).ok(), Some(role));
        }
        assert!(Role::from_db("ROOT").is_err());
    }

    #[test]
    fn status_round_trips_through_db_text() {
        for status in [
            AccountStatus::PendingVerification,
            AccountStatus::Active,
            AccountStatus::Disabled,
            AccountStatus::PendingDeletion,
            AccountStatus::Deleted,
        ] {
            assert_eq!(AccountStatus::from_db(status.as_str()).ok(), Some(status));
        }
        assert!(AccountStatus::from_db("limbo").is_err());
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(valid_email("a@example.com"));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-domain@"));
    }
}
