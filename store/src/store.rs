//! Balance store and transaction scope traits.

use async_trait::async_trait;
use rust_decimal::Decimal;
use strongbox_common::{AccountId, Currency, Result, ScopeId};

use crate::account::{Account, BalanceWrite};

/// Durable key-value layer holding account rows.
#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Get the backend name.
    fn name(&self) -> &str;

    /// Unlocked snapshot read of the committed row.
    async fn get(&self, account_id: AccountId) -> Result<Option<Account>>;

    /// Snapshot of every committed row, ordered by id.
    async fn list(&self) -> Result<Vec<Account>>;

    /// Open a transaction scope.
    async fn begin(&self) -> Result<Box<dyn TransactionScope>>;

    /// Insert a row and return its freshly assigned id.
    async fn create(&self, owner: &str, balance: Decimal, currency: &Currency) -> Result<AccountId>;

    /// Remove a row unconditionally. Returns the number of rows deleted (0 or 1).
    async fn delete(&self, account_id: AccountId) -> Result<u64>;
}

/// A bounded sequence of locked reads and writes.
///
/// Locks taken through [`TransactionScope::lock_for_update`] are held until
/// the scope is committed, rolled back or dropped. Dropping an unfinished
/// scope discards its writes.
#[async_trait]
pub trait TransactionScope: Send {
    /// Get the scope identifier.
    fn id(&self) -> ScopeId;

    /// Acquire the exclusive row lock and re-read the row.
    ///
    /// Blocks the calling task until the lock is free or the store's lock
    /// timeout elapses, in which case it fails with `LockTimeout`. Returns
    /// `None` if the row does not exist.
    async fn lock_for_update(&mut self, account_id: AccountId) -> Result<Option<Account>>;

    /// Stage updates of rows locked by this scope. Either every write is
    /// staged or none is. Returns the number of rows updated.
    async fn write_batch(&mut self, writes: &[BalanceWrite]) -> Result<u64>;

    /// Stage a single balance update.
    async fn write(&mut self, account_id: AccountId, balance: Decimal) -> Result<u64> {
        self.write_batch(&[BalanceWrite::new(account_id, balance)]).await
    }

    /// Make staged writes durable and release every lock.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard staged writes and release every lock.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
