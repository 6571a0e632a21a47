//! Transfer requests and their lifecycle.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strongbox_common::AccountId;

/// A request to move `amount` of `currency` between two accounts.
///
/// The currency is kept as the caller supplied it; the engine validates it
/// before touching the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    /// ISO 4217 code of the amount.
    #[serde(rename = "currencyCode")]
    pub currency: String,
    /// Amount to move; must be positive.
    pub amount: Decimal,
    /// Account debited.
    pub from_account_id: AccountId,
    /// Account credited.
    pub to_account_id: AccountId,
}

impl TransferRequest {
    /// Create a new transfer request.
    pub fn new(
        currency: impl Into<String>,
        amount: Decimal,
        from_account_id: AccountId,
        to_account_id: AccountId,
    ) -> Self {
        Self {
            currency: currency.into(),
            amount,
            from_account_id,
            to_account_id,
        }
    }
}

impl fmt::Display for TransferRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} from {} to {}",
            self.amount, self.currency, self.from_account_id, self.to_account_id
        )
    }
}

/// Where a transfer is in its lifecycle.
///
/// The happy path runs `Idle → LockingFrom → LockingTo → Validating →
/// Writing → Committed`. Any failure goes straight to `RolledBack`; a
/// transfer that fails never reaches `Writing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    Idle,
    LockingFrom,
    LockingTo,
    Validating,
    Writing,
    Committed,
    RolledBack,
}

impl TransferPhase {
    /// Check if the transfer has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferPhase::Committed | TransferPhase::RolledBack)
    }
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferPhase::Idle => "idle",
            TransferPhase::LockingFrom => "locking_from",
            TransferPhase::LockingTo => "locking_to",
            TransferPhase::Validating => "validating",
            TransferPhase::Writing => "writing",
            TransferPhase::Committed => "committed",
            TransferPhase::RolledBack => "rolled_back",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_request_from_json() {
        let json = r#"{"currencyCode":"EUR","amount":"50.0123","fromAccountId":5,"toAccountId":6}"#;
        let request: TransferRequest = serde_json::from_str(json).unwrap();

        assert_eq!(
            request,
            TransferRequest::new("EUR", dec!(50.0123), AccountId::new(5), AccountId::new(6))
        );
    }

    #[test]
    fn test_terminal_phases() {
        assert!(TransferPhase::Committed.is_terminal());
        assert!(TransferPhase::RolledBack.is_terminal());
        assert!(!TransferPhase::Writing.is_terminal());
    }
}
