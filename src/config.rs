//! Configuration module
//!
//! Loads configuration from environment variables.

use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Name of the durable transaction queue
    pub queue_name: String,

    /// Consumer tag reported to the queue
    pub consumer_tag: String,

    /// Number of consumption loops run by this process
    pub worker_concurrency: usize,

    /// Lowest balance a withdrawal may leave behind
    pub minimum_reserve: Decimal,

    /// How long a unit of work waits for an account row lock
    pub lock_timeout: Duration,

    /// Delay between polls of an empty queue
    pub queue_poll_interval: Duration,

    /// Unacknowledged deliveries older than this are redelivered
    pub queue_visibility_timeout: Duration,

    /// Redelivery bound for retryable failures; `None` requeues forever
    pub max_redeliveries: Option<u32>,

    /// Age after which an IN_PROGRESS audit record is reported as stale
    pub stale_in_progress_after: Duration,

    /// Environment (development, production)
    pub environment: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let max_redeliveries = match env::var("MAX_REDELIVERIES") {
            Ok(value) if !value.trim().is_empty() => Some(
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue("MAX_REDELIVERIES"))?,
            ),
            _ => None,
        };

        Ok(Self {
            database_url,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            queue_name: env::var("QUEUE_NAME").unwrap_or_else(|_| "transactions".to_string()),
            consumer_tag: env::var("CONSUMER_TAG")
                .unwrap_or_else(|_| "transaction-processor".to_string()),
            worker_concurrency: parse_or("WORKER_CONCURRENCY", 1)?,
            minimum_reserve: parse_or("MINIMUM_RESERVE", Decimal::new(100, 0))?,
            lock_timeout: Duration::from_millis(parse_or("LOCK_TIMEOUT_MS", 5_000)?),
            queue_poll_interval: Duration::from_millis(parse_or("QUEUE_POLL_INTERVAL_MS", 250)?),
            queue_visibility_timeout: Duration::from_secs(parse_or(
                "QUEUE_VISIBILITY_TIMEOUT_SECS",
                300,
            )?),
            max_redeliveries,
            stale_in_progress_after: Duration::from_secs(parse_or("STALE_IN_PROGRESS_SECS", 900)?),
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        })
    }
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue(key)),
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
    fn test_parse_or_default_when_unset() {
        let value: u32 = parse_or("QUEUE_LEDGER_TEST_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_config_error_messages() {
        assert_eq!(
            ConfigError::MissingEnv("DATABASE_URL").to_string(),
            "Missing environment variable: DATABASE_URL"
        );
        assert_eq!(
            ConfigError::InvalidValue("PORT").to_string(),
            "Invalid value for environment variable: PORT"
        );
    }
}
