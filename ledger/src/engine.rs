//! Core ledger engine implementation.

use std::sync::Arc;

use rust_decimal::Decimal;
use strongbox_common::{bounded, checked_add, checked_sub, AccountId, Currency, LedgerError, Result};
use strongbox_store::{Account, BalanceStore, BalanceWrite, TransactionScope};
use tracing::{debug, info, instrument, warn};

use crate::config::{LedgerConfig, LockOrdering};
use crate::transfer::{TransferPhase, TransferRequest};

/// The ledger engine applies balance changes atomically on a [`BalanceStore`].
///
/// Every mutating operation runs inside a single transaction scope: all of
/// its writes commit together or none of them do.
pub struct LedgerEngine {
    store: Arc<dyn BalanceStore>,
    lock_ordering: LockOrdering,
}

impl LedgerEngine {
    /// Create a new ledger engine with canonical lock ordering.
    pub fn new(store: Arc<dyn BalanceStore>) -> Self {
        Self {
            store,
            lock_ordering: LockOrdering::Canonical,
        }
    }

    /// Set the transfer lock ordering.
    pub fn with_lock_ordering(mut self, lock_ordering: LockOrdering) -> Self {
        self.lock_ordering = lock_ordering;
        self
    }

    /// Connect the configured store and build an engine on top of it.
    pub async fn from_config(config: &LedgerConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| LedgerError::invalid_field("config", e))?;

        let store = strongbox_store::connect(&config.store).await?;

        info!(
            backend = store.name(),
            lock_ordering = %config.lock_ordering,
            "Ledger engine initialized"
        );

        Ok(Self::new(store).with_lock_ordering(config.lock_ordering))
    }

    /// Get the underlying store.
    pub fn store(&self) -> &Arc<dyn BalanceStore> {
        &self.store
    }

    /// Get the transfer lock ordering.
    pub fn lock_ordering(&self) -> LockOrdering {
        self.lock_ordering
    }

    /// Add `delta` (possibly negative) to one account.
    ///
    /// Returns the number of rows updated. Fails with `InsufficientFunds` if
    /// the result would be negative, leaving the balance untouched.
    pub async fn adjust_balance(&self, account_id: AccountId, delta: Decimal) -> Result<u64> {
        let (rows, _) = self.adjust(account_id, delta).await?;
        Ok(rows)
    }

    /// Apply `delta` and yield the row as this scope committed it.
    #[instrument(skip(self), fields(account_id = %account_id, delta = %delta))]
    async fn adjust(&self, account_id: AccountId, delta: Decimal) -> Result<(u64, Account)> {
        let delta = bounded(delta, "delta")?;
        let mut scope = self.store.begin().await?;

        let outcome = Self::adjust_locked(scope.as_mut(), account_id, delta).await;
        let (rows, account) = Self::finish(scope, outcome).await?;

        debug!(rows, balance = %account.balance, "Balance adjusted");
        Ok((rows, account))
    }

    async fn adjust_locked(
        scope: &mut dyn TransactionScope,
        account_id: AccountId,
        delta: Decimal,
    ) -> Result<(u64, Account)> {
        let mut account = scope
            .lock_for_update(account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(account_id))?;

        let new_balance = checked_add(account.balance, delta, "delta")?;
        if new_balance < Decimal::ZERO {
            return Err(LedgerError::InsufficientFunds {
                account_id,
                balance: account.balance,
                requested: -delta,
            });
        }

        let rows = scope.write(account_id, new_balance).await?;
        account.balance = new_balance;
        Ok((rows, account))
    }

    /// Move `request.amount` from one account to another atomically.
    ///
    /// Returns the number of rows updated, which is 2 for every committed
    /// transfer. On any failure the scope is rolled back exactly once and
    /// both balances are left as they were.
    #[instrument(
        skip(self, request),
        fields(
            from = %request.from_account_id,
            to = %request.to_account_id,
            amount = %request.amount,
            currency = %request.currency
        )
    )]
    pub async fn transfer(&self, request: &TransferRequest) -> Result<u64> {
        let currency = Currency::parse(&request.currency)?;
        let amount = Self::positive_amount(request.amount)?;

        if request.from_account_id == request.to_account_id {
            return Err(LedgerError::invalid_field(
                "to_account_id",
                "Cannot transfer to the same account",
            ));
        }

        let mut scope = self.store.begin().await?;
        let mut phase = TransferPhase::Idle;

        let outcome = self
            .transfer_locked(scope.as_mut(), request, &currency, amount, &mut phase)
            .await;

        match Self::finish(scope, outcome).await {
            Ok(rows) => {
                advance(&mut phase, TransferPhase::Committed);
                info!(rows, "Transfer committed");
                Ok(rows)
            }
            Err(e) => {
                warn!(failed_in = %phase, error_code = e.error_code(), "Transfer failed");
                advance(&mut phase, TransferPhase::RolledBack);
                Err(e)
            }
        }
    }

    async fn transfer_locked(
        &self,
        scope: &mut dyn TransactionScope,
        request: &TransferRequest,
        currency: &Currency,
        amount: Decimal,
        phase: &mut TransferPhase,
    ) -> Result<u64> {
        let from_id = request.from_account_id;
        let to_id = request.to_account_id;

        let lock_from_first = match self.lock_ordering {
            LockOrdering::Canonical => from_id < to_id,
            LockOrdering::RequestOrder => true,
        };

        let (from, to) = if lock_from_first {
            advance(phase, TransferPhase::LockingFrom);
            let from = Self::lock_existing(scope, from_id).await?;
            advance(phase, TransferPhase::LockingTo);
            let to = Self::lock_existing(scope, to_id).await?;
            (from, to)
        } else {
            advance(phase, TransferPhase::LockingTo);
            let to = Self::lock_existing(scope, to_id).await?;
            advance(phase, TransferPhase::LockingFrom);
            let from = Self::lock_existing(scope, from_id).await?;
            (from, to)
        };

        advance(phase, TransferPhase::Validating);

        if from.currency != *currency {
            return Err(LedgerError::CurrencyMismatch {
                expected: currency.clone(),
                actual: from.currency,
            });
        }

        if to.currency != from.currency {
            return Err(LedgerError::CurrencyMismatch {
                expected: from.currency,
                actual: to.currency,
            });
        }

        if !from.has_sufficient_funds(amount) {
            return Err(LedgerError::InsufficientFunds {
                account_id: from_id,
                balance: from.balance,
                requested: amount,
            });
        }

        let from_remainder = checked_sub(from.balance, amount, "amount")?;
        let to_balance = checked_add(to.balance, amount, "amount")?;

        advance(phase, TransferPhase::Writing);

        let writes = [
            BalanceWrite::new(from_id, from_remainder),
            BalanceWrite::new(to_id, to_balance),
        ];
        let rows = scope.write_batch(&writes).await?;

        if rows != writes.len() as u64 {
            return Err(LedgerError::Internal(format!(
                "Transfer updated {} rows, expected {}",
                rows,
                writes.len()
            )));
        }

        Ok(rows)
    }

    async fn lock_existing(scope: &mut dyn TransactionScope, account_id: AccountId) -> Result<Account> {
        scope
            .lock_for_update(account_id)
            .await?
            .ok_or(LedgerError::AccountNotFound(account_id))
    }

    /// Commit on success, roll back on failure. Rollback happens exactly once.
    async fn finish<T>(scope: Box<dyn TransactionScope>, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => {
                scope.commit().await?;
                Ok(value)
            }
            Err(e) => {
                let scope_id = scope.id();
                if let Err(rollback_error) = scope.rollback().await {
                    warn!(
                        scope_id = %scope_id,
                        error = %rollback_error,
                        "Rollback failed"
                    );
                }
                debug!(scope_id = %scope_id, error_code = e.error_code(), "Scope rolled back");
                Err(e)
            }
        }
    }

    /// Get an account by id.
    pub async fn get_account(&self, account_id: AccountId) -> Result<Option<Account>> {
        self.store.get(account_id).await
    }

    /// Get the committed balance of an account.
    pub async fn get_balance(&self, account_id: AccountId) -> Result<Decimal> {
        self.store
            .get(account_id)
            .await?
            .map(|account| account.balance)
            .ok_or(LedgerError::AccountNotFound(account_id))
    }

    /// List every account, ordered by id.
    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        self.store.list().await
    }

    /// Open a new account.
    #[instrument(skip(self), fields(owner = %owner, balance = %balance, currency = %currency))]
    pub async fn create_account(
        &self,
        owner: &str,
        balance: Decimal,
        currency: &str,
    ) -> Result<AccountId> {
        let owner = owner.trim();
        if owner.is_empty() {
            return Err(LedgerError::invalid_field("owner", "Owner cannot be empty"));
        }

        let currency = Currency::parse(currency)?;
        let balance = bounded(balance, "balance")?;
        if balance < Decimal::ZERO {
            return Err(LedgerError::invalid_field(
                "balance",
                "Initial balance cannot be negative",
            ));
        }

        let account_id = self.store.create(owner, balance, &currency).await?;

        info!(account_id = %account_id, "Account created");
        Ok(account_id)
    }

    /// Delete an account. Returns the number of rows removed (0 or 1).
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn delete_account(&self, account_id: AccountId) -> Result<u64> {
        let rows = self.store.delete(account_id).await?;

        if rows == 0 {
            debug!("No account to delete");
        } else {
            info!("Account deleted");
        }

        Ok(rows)
    }

    /// Credit a positive amount and return the account as committed.
    pub async fn deposit(&self, account_id: AccountId, amount: Decimal) -> Result<Account> {
        let amount = Self::positive_amount(amount)?;
        let (_, account) = self.adjust(account_id, amount).await?;
        Ok(account)
    }

    /// Debit a positive amount and return the account as committed.
    pub async fn withdraw(&self, account_id: AccountId, amount: Decimal) -> Result<Account> {
        let amount = Self::positive_amount(amount)?;
        let (_, account) = self.adjust(account_id, -amount).await?;
        Ok(account)
    }

    fn positive_amount(amount: Decimal) -> Result<Decimal> {
        let amount = bounded(amount, "amount")?;
        if amount <= Decimal::ZERO {
            return Err(LedgerError::invalid_field("amount", "Amount must be positive"));
        }
        Ok(amount)
    }
}

fn advance(phase: &mut TransferPhase, next: TransferPhase) {
    debug!(from = %phase, to = %next, "Transfer phase");
    *phase = next;
}
