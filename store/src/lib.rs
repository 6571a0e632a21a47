//! Strongbox Balance Store
//!
//! Durable mapping from account id to (owner, balance, currency) with
//! exclusive per-row locks held for the lifetime of a transaction scope.
//!
//! Two backends implement [`BalanceStore`]:
//!
//! - [`MemoryBalanceStore`]: in-process rows, one async mutex per row
//! - [`PgBalanceStore`]: PostgreSQL via `sqlx`, `SELECT ... FOR UPDATE`

pub mod account;
pub mod config;
pub mod store;
pub mod memory;
pub mod postgres;

use std::sync::Arc;

use strongbox_common::Result;
use tracing::info;

pub use account::{Account, BalanceWrite};
pub use config::{StoreBackend, StoreConfig};
pub use memory::MemoryBalanceStore;
pub use postgres::PgBalanceStore;
pub use store::{BalanceStore, TransactionScope};

/// Build the backend selected by `config`.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn BalanceStore>> {
    let store: Arc<dyn BalanceStore> = match config.backend {
        StoreBackend::Memory => Arc::new(MemoryBalanceStore::new(config.lock_timeout)),
        StoreBackend::Postgres => {
            let store = PgBalanceStore::connect(config).await?;
            store.ensure_schema().await?;
            Arc::new(store)
        }
    };

    info!(
        backend = store.name(),
        lock_timeout_ms = config.lock_timeout.as_millis() as u64,
        "Balance store ready"
    );

    Ok(store)
}
