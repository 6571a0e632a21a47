//! Balance store configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Which backing medium holds the account rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// In-process rows; lost on exit.
    Memory,
    /// PostgreSQL database.
    Postgres,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            other => Err(format!("Unknown store backend: {}", other)),
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::Memory => write!(f, "memory"),
            StoreBackend::Postgres => write!(f, "postgres"),
        }
    }
}

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Backing medium.
    pub backend: StoreBackend,
    /// Database URL (postgres backend only).
    pub database_url: String,
    /// Maximum wait for a row lock.
    pub lock_timeout: Duration,
    /// Connection pool size (postgres backend only).
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            database_url: String::new(),
            lock_timeout: Duration::from_secs(1),
            max_connections: 10,
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(backend) = std::env::var("STRONGBOX_STORE") {
            if let Ok(backend) = backend.parse() {
                config.backend = backend;
            }
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }

        if let Ok(ms) = std::env::var("STRONGBOX_LOCK_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse() {
                config.lock_timeout = Duration::from_millis(ms);
            }
        }

        if let Ok(max) = std::env::var("STRONGBOX_DB_MAX_CONNECTIONS") {
            if let Ok(max) = max.parse() {
                config.max_connections = max;
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.lock_timeout.is_zero() {
            return Err("Lock timeout cannot be 0".to_string());
        }

        if self.backend == StoreBackend::Postgres {
            if self.database_url.is_empty() {
                return Err("Database URL cannot be empty for the postgres backend".to_string());
            }

            if self.max_connections == 0 {
                return Err("Max connections cannot be 0".to_string());
            }
        }

        Ok(())
    }
}
