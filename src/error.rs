use std::fmt;

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::warn;

use crate::store::StoreError;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Which daily counter a rejected operation ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    Transfer,
    Withdrawal,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitKind::Transfer => f.write_str("daily transfer"),
            LimitKind::Withdrawal => f.write_str("daily withdrawal"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("{resource} not found")]
    NotFound { resource: &'static str },
    #[error("Account is closed")]
    AccountClosed,
    #[error("Insufficient funds")]
    InsufficientFunds,
    #[error("{limit} limit exceeded: {used} used of {allowed}, requested {requested}")]
    LimitExceeded {
        limit: LimitKind,
        used: Decimal,
        allowed: Decimal,
        requested: Decimal,
    },
    #[error("Invalid account: {reason}")]
    InvalidAccount { reason: String },
    #[error("{reason}")]
    Conflict { reason: String, retryable: bool },
    #[error("Invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },
    #[error("Data integrity violation: {0}")]
    Integrity(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable, transport-independent error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotFound,
    AccountClosed,
    InsufficientFunds,
    LimitExceeded,
    InvalidAccount,
    Conflict,
    ValidationError,
    DataIntegrity,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::AccountClosed => "ACCOUNT_CLOSED",
            ErrorCode::InsufficientFunds => "INSUFFICIENT_FUNDS",
            ErrorCode::LimitExceeded => "LIMIT_EXCEEDED",
            ErrorCode::InvalidAccount => "INVALID_ACCOUNT",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::DataIntegrity => "DATA_INTEGRITY",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LedgerError {
    pub fn not_found(resource: &'static str) -> Self {
        Self::NotFound { resource }
    }

    pub fn invalid_account(reason: impl Into<String>) -> Self {
        Self::InvalidAccount {
            reason: reason.into(),
        }
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
            retryable: false,
        }
    }

    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            LedgerError::NotFound { .. } => ErrorCode::NotFound,
            LedgerError::AccountClosed => ErrorCode::AccountClosed,
            LedgerError::InsufficientFunds => ErrorCode::InsufficientFunds,
            LedgerError::LimitExceeded { .. } => ErrorCode::LimitExceeded,
            LedgerError::InvalidAccount { .. } => ErrorCode::InvalidAccount,
            LedgerError::Conflict { .. } => ErrorCode::Conflict,
            LedgerError::Validation { .. } => ErrorCode::ValidationError,
            LedgerError::Integrity(_) => ErrorCode::DataIntegrity,
            LedgerError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Business failures are expected outcomes the caller can act on.
    /// Everything else is infrastructure and must not be shown as one.
    pub fn is_business(&self) -> bool {
        !matches!(self, LedgerError::Integrity(_) | LedgerError::Internal(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::Conflict {
                retryable: true,
                ..
            }
        )
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SerializationConflict(_) => LedgerError::Conflict {
                reason: "Concurrent update detected, please retry".to_string(),
                retryable: true,
            },
            StoreError::Corrupt(details) => LedgerError::Integrity(details),
            StoreError::Unavailable(_) | StoreError::Duplicate { .. } => {
                warn!(error = %err, "storage failure");
                LedgerError::Internal("Storage operation failed".to_string())
            }
        }
    }
}
