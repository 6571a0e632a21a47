//! PostgreSQL balance store.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, info, instrument, warn};

use strongbox_common::{AccountId, Currency, LedgerError, Result, ScopeId};

use crate::account::{Account, BalanceWrite};
use crate::config::StoreConfig;
use crate::store::{BalanceStore, TransactionScope};

/// SQLSTATE raised when `lock_timeout` expires.
const LOCK_NOT_AVAILABLE: &str = "55P03";
/// SQLSTATE raised when the server breaks a lock cycle.
const DEADLOCK_DETECTED: &str = "40P01";
/// SQLSTATE raised when concurrent transactions cannot be serialized.
const SERIALIZATION_FAILURE: &str = "40001";

/// Lock-wait failures the caller may retry.
fn is_lock_conflict(code: &str) -> bool {
    matches!(code, LOCK_NOT_AVAILABLE | DEADLOCK_DETECTED | SERIALIZATION_FAILURE)
}

fn lock_conflict(account_id: Option<AccountId>, lock_timeout: Duration, detail: String) -> LedgerError {
    match account_id {
        Some(account_id) => LedgerError::LockTimeout {
            account_id,
            waited_ms: lock_timeout.as_millis() as u64,
        },
        None => LedgerError::StoreUnavailable(format!("Lock conflict: {}", detail)),
    }
}

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS account (
    account_id BIGSERIAL PRIMARY KEY,
    owner TEXT NOT NULL,
    balance NUMERIC(19, 4) NOT NULL CHECK (balance >= 0),
    currency_code VARCHAR(3) NOT NULL
)";
const SELECT_ACCOUNT: &str =
    "SELECT account_id, owner, balance, currency_code FROM account WHERE account_id = $1";
const SELECT_ACCOUNT_FOR_UPDATE: &str =
    "SELECT account_id, owner, balance, currency_code FROM account WHERE account_id = $1 FOR UPDATE";
const SELECT_ALL_ACCOUNTS: &str =
    "SELECT account_id, owner, balance, currency_code FROM account ORDER BY account_id";
const INSERT_ACCOUNT: &str =
    "INSERT INTO account (owner, balance, currency_code) VALUES ($1, $2, $3) RETURNING account_id";
const UPDATE_BALANCE: &str = "UPDATE account SET balance = $1 WHERE account_id = $2";
const DELETE_ACCOUNT: &str = "DELETE FROM account WHERE account_id = $1";

/// Map a driver error onto the ledger taxonomy.
fn map_sqlx_error(err: sqlx::Error, account_id: Option<AccountId>, lock_timeout: Duration) -> LedgerError {
    match &err {
        sqlx::Error::Database(db) if db.code().is_some_and(|code| is_lock_conflict(&code)) => {
            lock_conflict(account_id, lock_timeout, err.to_string())
        }
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            LedgerError::StoreUnavailable(err.to_string())
        }
        _ => LedgerError::Internal(err.to_string()),
    }
}

fn account_from_row(row: &PgRow) -> Result<Account> {
    let decode = |e: sqlx::Error| LedgerError::Internal(format!("Malformed account row: {}", e));

    let id: i64 = row.try_get("account_id").map_err(decode)?;
    let owner: String = row.try_get("owner").map_err(decode)?;
    let balance: Decimal = row.try_get("balance").map_err(decode)?;
    let currency: String = row.try_get("currency_code").map_err(decode)?;

    Ok(Account::new(
        AccountId::new(id),
        owner,
        balance,
        Currency::parse(currency.trim())?,
    ))
}

/// Begin a transaction whose row-lock waits are bounded by `lock_timeout`.
async fn begin_bounded(pool: &PgPool, lock_timeout: Duration) -> Result<Transaction<'static, Postgres>> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| map_sqlx_error(e, None, lock_timeout))?;

    // SET does not take bind parameters; the value is a plain integer.
    let set_timeout = format!("SET LOCAL lock_timeout = '{}ms'", lock_timeout.as_millis());
    sqlx::query(&set_timeout)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error(e, None, lock_timeout))?;

    Ok(tx)
}

/// Balance store backed by a PostgreSQL `account` table.
#[derive(Clone)]
pub struct PgBalanceStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgBalanceStore {
    /// Connect a pool using `config`.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.database_url)
            .await
            .map_err(|e| LedgerError::StoreUnavailable(e.to_string()))?;

        info!(max_connections = config.max_connections, "Connected to PostgreSQL");
        Ok(Self::from_pool(pool, config.lock_timeout))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Create the `account` table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, None, self.lock_timeout))?;
        Ok(())
    }
}

#[async_trait]
impl BalanceStore for PgBalanceStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn get(&self, account_id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(SELECT_ACCOUNT)
            .bind(account_id.as_i64())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, Some(account_id), self.lock_timeout))?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query(SELECT_ALL_ACCOUNTS)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, None, self.lock_timeout))?;

        rows.iter().map(account_from_row).collect()
    }

    async fn begin(&self) -> Result<Box<dyn TransactionScope>> {
        let tx = begin_bounded(&self.pool, self.lock_timeout).await?;
        Ok(Box::new(PgScope {
            id: ScopeId::new(),
            tx: Some(tx),
            locked: HashSet::new(),
            lock_timeout: self.lock_timeout,
        }))
    }

    #[instrument(skip(self, balance, currency), fields(currency = %currency))]
    async fn create(&self, owner: &str, balance: Decimal, currency: &Currency) -> Result<AccountId> {
        let row = sqlx::query(INSERT_ACCOUNT)
            .bind(owner)
            .bind(strongbox_common::normalize(balance))
            .bind(currency.code())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, None, self.lock_timeout))?;

        let Some(row) = row else {
            warn!(owner = %owner, "Insert produced no row");
            return Err(LedgerError::Internal("Account cannot be created".to_string()));
        };

        let id: i64 = row
            .try_get("account_id")
            .map_err(|e| LedgerError::Internal(format!("No account id returned: {}", e)))?;

        let account_id = AccountId::new(id);
        debug!(account_id = %account_id, "Account created");
        Ok(account_id)
    }

    #[instrument(skip(self))]
    async fn delete(&self, account_id: AccountId) -> Result<u64> {
        let mut tx = begin_bounded(&self.pool, self.lock_timeout).await?;

        let result = sqlx::query(DELETE_ACCOUNT)
            .bind(account_id.as_i64())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(e, Some(account_id), self.lock_timeout))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error(e, Some(account_id), self.lock_timeout))?;

        Ok(result.rows_affected())
    }
}

/// Transaction scope over one PostgreSQL transaction.
///
/// Dropping the scope drops the transaction, which the driver rolls back.
pub struct PgScope {
    id: ScopeId,
    tx: Option<Transaction<'static, Postgres>>,
    locked: HashSet<AccountId>,
    lock_timeout: Duration,
}

impl PgScope {
    fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| LedgerError::Internal(format!("Scope {} already finished", self.id)))
    }
}

#[async_trait]
impl TransactionScope for PgScope {
    fn id(&self) -> ScopeId {
        self.id
    }

    async fn lock_for_update(&mut self, account_id: AccountId) -> Result<Option<Account>> {
        let lock_timeout = self.lock_timeout;
        let tx = self.tx()?;

        let row = sqlx::query(SELECT_ACCOUNT_FOR_UPDATE)
            .bind(account_id.as_i64())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error(e, Some(account_id), lock_timeout))?;

        let account = row.as_ref().map(account_from_row).transpose()?;
        if account.is_some() {
            debug!(scope_id = %self.id, account_id = %account_id, "Row locked for update");
            self.locked.insert(account_id);
        }
        Ok(account)
    }

    async fn write_batch(&mut self, writes: &[BalanceWrite]) -> Result<u64> {
        if let Some(write) = writes.iter().find(|w| !self.locked.contains(&w.account_id)) {
            return Err(LedgerError::Internal(format!(
                "Account {} is not locked by scope {}",
                write.account_id, self.id
            )));
        }

        let lock_timeout = self.lock_timeout;
        let tx = self.tx()?;
        let mut updated = 0;

        for write in writes {
            let result = sqlx::query(UPDATE_BALANCE)
                .bind(write.balance)
                .bind(write.account_id.as_i64())
                .execute(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error(e, Some(write.account_id), lock_timeout))?;
            updated += result.rows_affected();
        }

        Ok(updated)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut scope = self;
        let tx = scope
            .tx
            .take()
            .ok_or_else(|| LedgerError::Internal(format!("Scope {} already finished", scope.id)))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error(e, None, scope.lock_timeout))?;

        debug!(scope_id = %scope.id, "Scope committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut scope = self;
        if let Some(tx) = scope.tx.take() {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error(e, None, scope.lock_timeout))?;
        }

        debug!(scope_id = %scope.id, "Scope rolled back");
        Ok(())
    }
}
