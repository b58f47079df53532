//! Environment-driven configuration.
//!
//! One variable names the bus endpoint, one names the database, one the BFF
//! listener; the log level rides the conventional `RUST_LOG`. Defaults are
//! development-friendly.

use std::env;
use thiserror::Error;

/// Environment variable naming the bus endpoint (`host:port`, comma-separated).
pub const BUS_BROKERS_VAR: &str = "BUS_BROKERS";
/// Environment variable naming the saga log database.
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
/// Environment variable naming the BFF bind address.
pub const BIND_ADDR_VAR: &str = "BIND_ADDR";

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required variable is absent.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
}

/// Bus connection settings.
#[derive(Debug, Clone)]
pub struct BusSettings {
    /// Broker addresses, comma-separated `host:port`.
    pub brokers: String,
}

impl BusSettings {
    /// Read from the environment, defaulting to a local broker.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            brokers: env::var(BUS_BROKERS_VAR).unwrap_or_else(|_| "localhost:9092".to_string()),
        }
    }
}

/// The saga log database URL; required where a saga log is wired.
///
/// # Errors
///
/// Returns [`ConfigError::Missing`] when `DATABASE_URL` is unset.
pub fn database_url() -> Result<String, ConfigError> {
    env::var(DATABASE_URL_VAR).map_err(|_| ConfigError::Missing(DATABASE_URL_VAR))
}

/// BFF listener address, defaulting to all interfaces on 8080.
#[must_use]
pub fn bind_addr() -> String {
    env::var(BIND_ADDR_VAR).unwrap_or_else(|_| "0.0.0.0:8080".to_string())
}
