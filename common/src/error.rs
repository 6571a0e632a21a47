//! Error types for Strongbox ledger operations.

use crate::{AccountId, Currency};
use rust_decimal::Decimal;
use thiserror::Error;

/// Main error type for ledger operations.
///
/// Every variant is recoverable from the caller's point of view. Whenever one
/// of these is returned by a mutating operation, the operation has had no
/// effect on any balance.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// No account row with this id.
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// The operation would leave the account with a negative balance.
    #[error("Insufficient funds in account {account_id}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        account_id: AccountId,
        balance: Decimal,
        requested: Decimal,
    },

    /// Request and account currencies disagree.
    #[error("Currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch { expected: Currency, actual: Currency },

    /// Not a valid ISO 4217 code.
    #[error("Invalid currency code: '{0}'")]
    InvalidCurrency(String),

    /// Row lock not acquired within the configured wait.
    #[error("Timed out after {waited_ms}ms waiting for lock on account {account_id}")]
    LockTimeout { account_id: AccountId, waited_ms: u64 },

    /// Backing medium unreachable.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Malformed caller input.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        message: String,
        field: Option<String>,
    },

    /// Store misuse or a broken store invariant.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Shorthand for an [`LedgerError::InvalidRequest`] tied to a field.
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        LedgerError::InvalidRequest {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::LockTimeout { .. } | LedgerError::StoreUnavailable(_)
        )
    }

    /// Get suggested retry delay in milliseconds.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            LedgerError::LockTimeout { .. } => Some(100),
            LedgerError::StoreUnavailable(_) => Some(1000),
            _ => None,
        }
    }

    /// Get a stable error code a transport layer can map to a status.
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            LedgerError::InvalidCurrency(_) => "INVALID_CURRENCY",
            LedgerError::LockTimeout { .. } => "LOCK_TIMEOUT",
            LedgerError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            LedgerError::InvalidRequest { .. } => "INVALID_REQUEST",
            LedgerError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
