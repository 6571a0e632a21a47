//! Strongbox Common Types
//!
//! This crate contains shared types used across the Strongbox ledger,
//! including account identifiers, scale-4 monetary helpers, ISO 4217
//! currency validation and the ledger error taxonomy.

pub mod identifiers;
pub mod monetary;
pub mod error;

pub use identifiers::*;
pub use monetary::*;
pub use error::*;
