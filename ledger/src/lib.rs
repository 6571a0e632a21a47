//! Strongbox Ledger Engine
//!
//! Single-account adjustments and two-account transfers on top of a
//! [`BalanceStore`], with currency gating, non-negative balances and
//! all-or-nothing application of every operation.

pub mod config;
pub mod engine;
pub mod transfer;

pub use config::{LedgerConfig, LockOrdering};
pub use engine::LedgerEngine;
pub use transfer::{TransferPhase, TransferRequest};

pub use strongbox_store::{Account, BalanceStore};
