//! Database module
//!
//! Connection, schema verification, and SQLSTATE classification.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::Config;

/// SQLSTATE codes the pipeline reacts to
const LOCK_NOT_AVAILABLE: &str = "55P03";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const UNIQUE_VIOLATION: &str = "23505";

/// Classified database failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlFailure {
    LockNotAvailable,
    SerializationFailure,
    UniqueViolation,
    Other,
}

/// Map a `sqlx` error onto the failures the pipeline distinguishes
pub fn classify(err: &sqlx::Error) -> SqlFailure {
    let code = match err {
        sqlx::Error::Database(db_err) => db_err.code(),
        _ => None,
    };

    match code.as_deref() {
        Some(LOCK_NOT_AVAILABLE) => SqlFailure::LockNotAvailable,
        Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) => SqlFailure::SerializationFailure,
        Some(UNIQUE_VIOLATION) => SqlFailure::UniqueViolation,
        _ => SqlFailure::Other,
    }
}

/// Create the connection pool from configuration
pub async fn connect(config: &Config) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
}

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    let required_tables = ["accounts", "transaction_logs", "queues", "queue_messages"];

    for table in required_tables {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!("Required table '{}' does not exist", table);
            return Ok(false);
        }
    }

    Ok(true)
}
