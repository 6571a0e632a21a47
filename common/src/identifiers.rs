//! Identifier types for Strongbox entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of an account row.
///
/// Assigned by the balance store on creation and never changed afterwards.
/// Ordering follows the numeric value, which is what canonical lock ordering
/// relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(i64);

impl AccountId {
    /// Create an account ID from its raw value.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Store-assigned ids are always positive.
    pub fn is_valid(&self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for AccountId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Identifier of a single transaction scope, used to correlate log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeId(Uuid);

impl ScopeId {
    /// Create a new scope ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ScopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_id_ordering() {
        let low = AccountId::new(3);
        let high = AccountId::new(12);
        assert!(low < high);
        assert_eq!(low.max(high), high);
    }

    #[test]
    fn test_account_id_validity() {
        assert!(AccountId::new(1).is_valid());
        assert!(!AccountId::new(0).is_valid());
        assert!(!AccountId::new(-7).is_valid());
    }

    #[test]
    fn test_account_id_serializes_as_number() {
        let json = serde_json::to_string(&AccountId::new(42)).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn test_scope_id_creation() {
        assert_ne!(ScopeId::new(), ScopeId::new());
    }
}
