//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Storage backend selected at composition time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" | "in-memory" | "inmemory" => Ok(Self::Memory),
            _ => Err(ConfigError::InvalidValue("STORAGE_BACKEND")),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Storage backend for repositories, event store and processing log
    pub storage_backend: StorageBackend,

    /// Database connection URL (required for the postgres backend)
    pub database_url: Option<String>,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Number of bus workers serving publish_async
    pub bus_workers: usize,

    /// Capacity of the publish_async queue
    pub bus_queue_capacity: usize,

    /// Processing records older than this are considered crashed
    pub stale_processing_after: Duration,

    /// Interval of the maintenance jobs
    pub redelivery_interval: Duration,

    /// Interval of the outbox relay
    pub outbox_relay_interval: Duration,

    /// Environment (development, production)
    pub environment: String,

    /// Emit JSON logs instead of human-readable ones
    pub json_logs: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let storage_backend = env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .parse()?;

        let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());
        if storage_backend == StorageBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingEnv("DATABASE_URL"));
        }

        let database_max_connections = parse_env("DATABASE_MAX_CONNECTIONS", 10)?;

        let bus_workers: usize = parse_env("BUS_WORKERS", 5)?;
        if bus_workers == 0 {
            return Err(ConfigError::InvalidValue("BUS_WORKERS"));
        }

        let bus_queue_capacity: usize = parse_env("BUS_QUEUE_CAPACITY", 1000)?;
        if bus_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue("BUS_QUEUE_CAPACITY"));
        }

        let stale_processing_after = Duration::from_secs(parse_env("STALE_PROCESSING_SECS", 300)?);
        let redelivery_interval = Duration::from_secs(parse_env("REDELIVERY_INTERVAL_SECS", 60)?);
        let outbox_relay_interval =
            Duration::from_secs(parse_env("OUTBOX_RELAY_INTERVAL_SECS", 5)?);

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let json_logs = env::var("LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Ok(Self {
            storage_backend,
            database_url,
            database_max_connections,
            bus_workers,
            bus_queue_capacity,
            stale_processing_after,
            redelivery_interval,
            outbox_relay_interval,
            environment,
            json_logs,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn parse_env<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_backend_parse() {
        assert_eq!("postgres".parse::<StorageBackend>().unwrap(), StorageBackend::Postgres);
        assert_eq!("Memory".parse::<StorageBackend>().unwrap(), StorageBackend::Memory);
        assert!(matches!(
            "redis".parse::<StorageBackend>(),
            Err(ConfigError::InvalidValue("STORAGE_BACKEND"))
        ));
    }

    #[test]
    fn test_parse_env_default_when_unset() {
        let value: u64 = parse_env("FINANCE_LEDGER_TEST_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }
}
