//! Account rows held by the balance store.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strongbox_common::{normalize, AccountId, Currency};

/// A persisted account row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Store-assigned identifier.
    pub id: AccountId,
    /// Owner name.
    pub owner: String,
    /// Current balance, scale 4.
    pub balance: Decimal,
    /// Account currency.
    pub currency: Currency,
}

impl Account {
    /// Create an account row, normalizing the balance.
    pub fn new(id: AccountId, owner: impl Into<String>, balance: Decimal, currency: Currency) -> Self {
        Self {
            id,
            owner: owner.into(),
            balance: normalize(balance),
            currency,
        }
    }

    /// Check if the account can give up `amount` without going negative.
    pub fn has_sufficient_funds(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }
}

/// A staged balance update for one locked row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceWrite {
    /// Row to update.
    pub account_id: AccountId,
    /// Balance to store.
    pub balance: Decimal,
}

impl BalanceWrite {
    /// Create a write, normalizing the balance.
    pub fn new(account_id: AccountId, balance: Decimal) -> Self {
        Self {
            account_id,
            balance: normalize(balance),
        }
    }
}
