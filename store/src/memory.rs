//! In-memory balance store with per-row locks.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument, warn};

use strongbox_common::{AccountId, Currency, LedgerError, Result, ScopeId};

use crate::account::{Account, BalanceWrite};
use crate::store::{BalanceStore, TransactionScope};

/// One account row and its lock.
struct RowSlot {
    /// Committed contents. `None` once the row has been deleted.
    state: RwLock<Option<Account>>,
    /// Exclusive row lock, held by at most one scope.
    lock: Arc<Mutex<()>>,
}

impl RowSlot {
    fn new(account: Account) -> Self {
        Self {
            state: RwLock::new(Some(account)),
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn snapshot(&self) -> Option<Account> {
        self.state.read().clone()
    }
}

struct MemoryInner {
    rows: DashMap<AccountId, Arc<RowSlot>>,
    next_id: AtomicI64,
    /// Commits take this exclusively so that `list` never sees half a batch.
    commit_gate: RwLock<()>,
    lock_timeout: Duration,
}

impl MemoryInner {
    fn slot(&self, account_id: AccountId) -> Option<Arc<RowSlot>> {
        self.rows.get(&account_id).map(|slot| slot.value().clone())
    }

    async fn acquire(&self, account_id: AccountId, slot: &RowSlot) -> Result<OwnedMutexGuard<()>> {
        let started = Instant::now();
        match tokio::time::timeout(self.lock_timeout, slot.lock.clone().lock_owned()).await {
            Ok(guard) => {
                debug!(
                    account_id = %account_id,
                    waited_us = started.elapsed().as_micros() as u64,
                    "Row lock acquired"
                );
                Ok(guard)
            }
            Err(_) => {
                warn!(account_id = %account_id, "Row lock wait timed out");
                Err(LedgerError::LockTimeout {
                    account_id,
                    waited_ms: self.lock_timeout.as_millis() as u64,
                })
            }
        }
    }
}

/// Balance store keeping rows in process memory.
///
/// Each row carries its own async mutex, so operations on disjoint accounts
/// never contend. Cloning the store shares the same rows.
#[derive(Clone)]
pub struct MemoryBalanceStore {
    inner: Arc<MemoryInner>,
}

impl MemoryBalanceStore {
    /// Create an empty store.
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                rows: DashMap::new(),
                next_id: AtomicI64::new(1),
                commit_gate: RwLock::new(()),
                lock_timeout,
            }),
        }
    }

    /// Number of rows currently stored.
    pub fn len(&self) -> usize {
        self.inner.rows.len()
    }

    /// Check if the store holds no rows.
    pub fn is_empty(&self) -> bool {
        self.inner.rows.is_empty()
    }

    /// Configured maximum wait for a row lock.
    pub fn lock_timeout(&self) -> Duration {
        self.inner.lock_timeout
    }
}

impl Default for MemoryBalanceStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[async_trait]
impl BalanceStore for MemoryBalanceStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, account_id: AccountId) -> Result<Option<Account>> {
        Ok(self.inner.slot(account_id).and_then(|slot| slot.snapshot()))
    }

    async fn list(&self) -> Result<Vec<Account>> {
        let _gate = self.inner.commit_gate.read();
        let mut accounts: Vec<Account> = self
            .inner
            .rows
            .iter()
            .filter_map(|slot| slot.value().snapshot())
            .collect();
        accounts.sort_by_key(|account| account.id);
        Ok(accounts)
    }

    async fn begin(&self) -> Result<Box<dyn TransactionScope>> {
        Ok(Box::new(MemoryScope::new(self.inner.clone())))
    }

    #[instrument(skip(self, balance, currency), fields(currency = %currency))]
    async fn create(&self, owner: &str, balance: Decimal, currency: &Currency) -> Result<AccountId> {
        let account_id = AccountId::new(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let account = Account::new(account_id, owner, balance, currency.clone());

        match self.inner.rows.entry(account_id) {
            Entry::Occupied(_) => {
                return Err(LedgerError::Internal(format!(
                    "Account {} cannot be created: id already assigned",
                    account_id
                )));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(RowSlot::new(account)));
            }
        }

        debug!(account_id = %account_id, "Account created");
        Ok(account_id)
    }

    #[instrument(skip(self))]
    async fn delete(&self, account_id: AccountId) -> Result<u64> {
        let Some(slot) = self.inner.slot(account_id) else {
            return Ok(0);
        };

        // Deleting is a write: wait for any scope holding the row.
        let _guard = self.inner.acquire(account_id, &slot).await?;

        let removed = {
            let _gate = self.inner.commit_gate.write();
            let existed = slot.state.write().take().is_some();
            self.inner
                .rows
                .remove_if(&account_id, |_, current| Arc::ptr_eq(current, &slot));
            existed
        };

        if removed {
            debug!(account_id = %account_id, "Account deleted");
            Ok(1)
        } else {
            Ok(0)
        }
    }
}

/// A row locked by a scope.
struct HeldRow {
    slot: Arc<RowSlot>,
    _guard: OwnedMutexGuard<()>,
}

/// Transaction scope over a [`MemoryBalanceStore`].
///
/// Writes are staged until commit; dropping the scope releases every row lock
/// and discards them.
pub struct MemoryScope {
    id: ScopeId,
    inner: Arc<MemoryInner>,
    held: HashMap<AccountId, HeldRow>,
    staged: BTreeMap<AccountId, Decimal>,
    finished: bool,
}

impl MemoryScope {
    fn new(inner: Arc<MemoryInner>) -> Self {
        Self {
            id: ScopeId::new(),
            inner,
            held: HashMap::new(),
            staged: BTreeMap::new(),
            finished: false,
        }
    }

    /// The row as this scope sees it: committed contents plus staged writes.
    fn view(&self, account_id: AccountId, slot: &RowSlot) -> Option<Account> {
        let mut account = slot.snapshot()?;
        if let Some(balance) = self.staged.get(&account_id) {
            account.balance = *balance;
        }
        Some(account)
    }

    fn release(&mut self) {
        self.finished = true;
        self.staged.clear();
        self.held.clear();
    }
}

#[async_trait]
impl TransactionScope for MemoryScope {
    fn id(&self) -> ScopeId {
        self.id
    }

    async fn lock_for_update(&mut self, account_id: AccountId) -> Result<Option<Account>> {
        if let Some(held) = self.held.get(&account_id) {
            return Ok(self.view(account_id, &held.slot));
        }

        let Some(slot) = self.inner.slot(account_id) else {
            return Ok(None);
        };

        let guard = self.inner.acquire(account_id, &slot).await?;

        // Re-read under the lock; the row may have changed or gone meanwhile.
        let Some(account) = slot.snapshot() else {
            return Ok(None);
        };

        debug!(scope_id = %self.id, account_id = %account_id, "Row locked for update");
        self.held.insert(account_id, HeldRow { slot, _guard: guard });
        Ok(Some(account))
    }

    async fn write_batch(&mut self, writes: &[BalanceWrite]) -> Result<u64> {
        for write in writes {
            if !self.held.contains_key(&write.account_id) {
                return Err(LedgerError::Internal(format!(
                    "Account {} is not locked by scope {}",
                    write.account_id, self.id
                )));
            }
            if write.balance < Decimal::ZERO {
                return Err(LedgerError::Internal(format!(
                    "Refusing negative balance {} for account {}",
                    write.balance, write.account_id
                )));
            }
        }

        for write in writes {
            self.staged.insert(write.account_id, write.balance);
        }

        Ok(writes.len() as u64)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut scope = self;
        {
            let _gate = scope.inner.commit_gate.write();
            for (account_id, balance) in &scope.staged {
                if let Some(held) = scope.held.get(account_id) {
                    if let Some(account) = held.slot.state.write().as_mut() {
                        account.balance = *balance;
                    }
                }
            }
        }

        debug!(scope_id = %scope.id, rows = scope.staged.len(), "Scope committed");
        scope.release();
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut scope = self;
        debug!(scope_id = %scope.id, discarded = scope.staged.len(), "Scope rolled back");
        scope.release();
        Ok(())
    }
}

impl Drop for MemoryScope {
    fn drop(&mut self) {
        if !self.finished && !self.held.is_empty() {
            warn!(
                scope_id = %self.id,
                discarded = self.staged.len(),
                "Scope dropped without commit or rollback; writes discarded"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn store_with_timeout(ms: u64) -> MemoryBalanceStore {
        MemoryBalanceStore::new(Duration::from_millis(ms))
    }

    #[tokio::test]
    async fn test_create_assigns_sequential_ids() {
        let store = MemoryBalanceStore::default();
        let first = store.create("alice", dec!(100), &Currency::usd()).await.unwrap();
        let second = store.create("bob", dec!(0), &Currency::usd()).await.unwrap();

        assert_eq!(first, AccountId::new(1));
        assert_eq!(second, AccountId::new(2));

        let account = store.get(first).await.unwrap().unwrap();
        assert_eq!(account.owner, "alice");
        assert_eq!(account.balance.to_string(), "100.0000");
    }

    #[tokio::test]
    async fn test_get_missing_account() {
        let store = MemoryBalanceStore::default();
        assert!(store.get(AccountId::new(99)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_applies_writes() {
        let store = MemoryBalanceStore::default();
        let id = store.create("alice", dec!(500), &Currency::eur()).await.unwrap();

        let mut scope = store.begin().await.unwrap();
        let account = scope.lock_for_update(id).await.unwrap().unwrap();
        assert_eq!(scope.write(id, account.balance - dec!(50)).await.unwrap(), 1);

        // Not visible outside the scope before commit.
        assert_eq!(store.get(id).await.unwrap().unwrap().balance, dec!(500));

        scope.commit().await.unwrap();
        assert_eq!(store.get(id).await.unwrap().unwrap().balance, dec!(450));
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = MemoryBalanceStore::default();
        let id = store.create("alice", dec!(500), &Currency::eur()).await.unwrap();

        let mut scope = store.begin().await.unwrap();
        scope.lock_for_update(id).await.unwrap();
        scope.write(id, dec!(1)).await.unwrap();
        scope.rollback().await.unwrap();

        assert_eq!(store.get(id).await.unwrap().unwrap().balance, dec!(500));
    }

    #[tokio::test]
    async fn test_drop_releases_locks() {
        let store = store_with_timeout(50);
        let id = store.create("alice", dec!(10), &Currency::usd()).await.unwrap();

        {
            let mut scope = store.begin().await.unwrap();
            scope.lock_for_update(id).await.unwrap();
            scope.write(id, dec!(0)).await.unwrap();
        }

        let mut scope = store.begin().await.unwrap();
        let account = scope.lock_for_update(id).await.unwrap().unwrap();
        assert_eq!(account.balance, dec!(10));
        scope.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_wait_times_out() {
        let store = store_with_timeout(50);
        let id = store.create("alice", dec!(10), &Currency::usd()).await.unwrap();

        let mut holder = store.begin().await.unwrap();
        holder.lock_for_update(id).await.unwrap();

        let mut waiter = store.begin().await.unwrap();
        let result = waiter.lock_for_update(id).await;
        assert!(matches!(
            result,
            Err(LedgerError::LockTimeout { account_id, waited_ms: 50 }) if account_id == id
        ));

        holder.rollback().await.unwrap();
        waiter.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_waiter_sees_committed_balance() {
        let store = MemoryBalanceStore::default();
        let id = store.create("alice", dec!(10), &Currency::usd()).await.unwrap();

        let mut holder = store.begin().await.unwrap();
        holder.lock_for_update(id).await.unwrap();

        let waiter_store = store.clone();
        let waiter = tokio::spawn(async move {
            let mut scope = waiter_store.begin().await.unwrap();
            let account = scope.lock_for_update(id).await.unwrap().unwrap();
            scope.rollback().await.unwrap();
            account.balance
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        holder.write(id, dec!(7)).await.unwrap();
        holder.commit().await.unwrap();

        assert_eq!(waiter.await.unwrap(), dec!(7));
    }

    #[tokio::test]
    async fn test_relock_in_same_scope_sees_staged_write() {
        let store = store_with_timeout(50);
        let id = store.create("alice", dec!(10), &Currency::usd()).await.unwrap();

        let mut scope = store.begin().await.unwrap();
        scope.lock_for_update(id).await.unwrap();
        scope.write(id, dec!(3)).await.unwrap();

        let again = scope.lock_for_update(id).await.unwrap().unwrap();
        assert_eq!(again.balance, dec!(3));
        scope.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_requires_lock() {
        let store = MemoryBalanceStore::default();
        let locked = store.create("alice", dec!(10), &Currency::usd()).await.unwrap();
        let unlocked = store.create("bob", dec!(10), &Currency::usd()).await.unwrap();

        let mut scope = store.begin().await.unwrap();
        scope.lock_for_update(locked).await.unwrap();

        let batch = [
            BalanceWrite::new(locked, dec!(5)),
            BalanceWrite::new(unlocked, dec!(15)),
        ];
        assert!(matches!(
            scope.write_batch(&batch).await,
            Err(LedgerError::Internal(_))
        ));

        // Nothing from the rejected batch was staged.
        scope.commit().await.unwrap();
        assert_eq!(store.get(locked).await.unwrap().unwrap().balance, dec!(10));
        assert_eq!(store.get(unlocked).await.unwrap().unwrap().balance, dec!(10));
    }

    #[tokio::test]
    async fn test_delete_account() {
        let store = MemoryBalanceStore::default();
        let id = store.create("alice", dec!(10), &Currency::usd()).await.unwrap();

        assert_eq!(store.delete(id).await.unwrap(), 1);
        assert_eq!(store.delete(id).await.unwrap(), 0);
        assert!(store.get(id).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_delete_waits_for_row_lock() {
        let store = store_with_timeout(50);
        let id = store.create("alice", dec!(10), &Currency::usd()).await.unwrap();

        let mut holder = store.begin().await.unwrap();
        holder.lock_for_update(id).await.unwrap();

        assert!(matches!(
            store.delete(id).await,
            Err(LedgerError::LockTimeout { .. })
        ));
        holder.rollback().await.unwrap();

        assert_eq!(store.delete(id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_ordered_by_id() {
        let store = MemoryBalanceStore::default();
        for owner in ["a", "b", "c"] {
            store.create(owner, dec!(1), &Currency::gbp()).await.unwrap();
        }
        store.delete(AccountId::new(2)).await.unwrap();

        let ids: Vec<i64> = store
            .list()
            .await
            .unwrap()
            .iter()
            .map(|a| a.id.as_i64())
            .collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_disjoint_rows_do_not_block() {
        tokio_test::block_on(async {
            let store = store_with_timeout(50);
            let a = store.create("a", dec!(1), &Currency::usd()).await.unwrap();
            let b = store.create("b", dec!(1), &Currency::usd()).await.unwrap();

            let mut first = store.begin().await.unwrap();
            let mut second = store.begin().await.unwrap();
            assert!(first.lock_for_update(a).await.unwrap().is_some());
            assert!(second.lock_for_update(b).await.unwrap().is_some());

            first.commit().await.unwrap();
            second.commit().await.unwrap();
        });
    }
}
