//! Error taxonomy shared by every core operation.
//!
//! Every variant except `Storage` is recoverable and maps to a stable
//! machine-readable kind the transport layer can surface as-is. `Storage`
//! wraps backing-service failures; callers retry those under their own policy.

use crate::account::AccountStatus;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    /// Uniform authentication failure. Unknown email and wrong password are
    /// indistinguishable so login cannot be used to probe for accounts.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("rate limited")]
    RateLimited,

    #[error("invalid code")]
    InvalidCode,

    #[error("code expired")]
    Expired,

    #[error("too many attempts")]
    TooManyAttempts,

    #[error("code already used")]
    AlreadyUsed,

    #[error("invalid token")]
    InvalidToken,

    #[error("token revoked")]
    Revoked,

    #[error("token expired")]
    TokenExpired,

    #[error("invalid transition: {from} -> {event}")]
    InvalidTransition {
        from: AccountStatus,
        event: &'static str,
    },

    #[error("forbidden")]
    Forbidden,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl Error {
    /// Stable machine-readable kind for the wire contract.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::InvalidCredentials => "invalid_credentials",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::RateLimited => "rate_limited",
            Self::InvalidCode => "invalid_code",
            Self::Expired => "expired",
            Self::TooManyAttempts => "too_many_attempts",
            Self::AlreadyUsed => "already_used",
            Self::InvalidToken => "invalid_token",
            Self::Revoked => "revoked",
            Self::TokenExpired => "token_expired",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Forbidden => "forbidden",
            Self::Storage(_) => "storage_error",
        }
    }

    /// Whether the error is recoverable by the caller (everything except
    /// backing-store unavailability).
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
