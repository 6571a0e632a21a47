//! Ledger engine configuration.

use std::fmt;
use std::str::FromStr;

use strongbox_store::StoreConfig;

/// Order in which a transfer acquires its two row locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockOrdering {
    /// Ascending account id, whatever the transfer direction. Two transfers
    /// over the same pair of accounts can never wait on each other in a cycle.
    #[default]
    Canonical,
    /// Source first, then destination. Opposite transfers between the same
    /// accounts can stall each other until one hits the lock timeout.
    RequestOrder,
}

impl FromStr for LockOrdering {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "canonical" => Ok(LockOrdering::Canonical),
            "request-order" | "request_order" => Ok(LockOrdering::RequestOrder),
            other => Err(format!("Unknown lock ordering: {}", other)),
        }
    }
}

impl fmt::Display for LockOrdering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockOrdering::Canonical => write!(f, "canonical"),
            LockOrdering::RequestOrder => write!(f, "request-order"),
        }
    }
}

/// Main ledger configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Balance store configuration.
    pub store: StoreConfig,
    /// Transfer lock ordering.
    pub lock_ordering: LockOrdering,
    /// Log level.
    pub log_level: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            lock_ordering: LockOrdering::default(),
            log_level: "info".to_string(),
        }
    }
}

impl LedgerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self {
            store: StoreConfig::from_env(),
            ..Self::default()
        };

        if let Ok(ordering) = std::env::var("STRONGBOX_LOCK_ORDERING") {
            if let Ok(ordering) = ordering.parse() {
                config.lock_ordering = ordering;
            }
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.store.validate()?;

        if self.log_level.trim().is_empty() {
            return Err("Log level cannot be empty".to_string());
        }

        Ok(())
    }
}
