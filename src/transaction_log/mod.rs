//! Transaction Log
//!
//! The audit store holding one `TransactionLog` per transaction id, and the
//! lifecycle service that owns its status state machine.

mod memory;
mod repository;
mod service;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{DomainError, HistoryFilter, Pagination, TransactionLog, TransactionStatus};

pub use memory::InMemoryAuditStore;
pub use repository::PgAuditStore;
pub use service::{StatusChange, TransactionLogService};

/// Document store of audit records.
///
/// Stores do not enforce status ordering; `TransactionLogService` does.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Insert a new record. Fails with `Duplicate` if the transaction id exists.
    async fn insert(&self, log: &TransactionLog) -> Result<(), AuditStoreError>;

    async fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<TransactionLog>, AuditStoreError>;

    /// Overwrite status (and `processed_at` when given). Fails with
    /// `NotFound` if no record matches.
    async fn set_status(
        &self,
        transaction_id: &str,
        status: TransactionStatus,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<(), AuditStoreError>;

    /// Increment `retry_count`, returning the new value
    async fn increment_retry_count(&self, transaction_id: &str) -> Result<i32, AuditStoreError>;

    /// Records touching the account, newest first, with the filtered total
    async fn history(
        &self,
        account_id: i64,
        filter: &HistoryFilter,
        page: Pagination,
    ) -> Result<(Vec<TransactionLog>, i64), AuditStoreError>;

    /// Records in `status` created before `older_than`, oldest first
    async fn find_by_status_before(
        &self,
        status: TransactionStatus,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TransactionLog>, AuditStoreError>;
}

/// Audit store errors
#[derive(Debug, thiserror::Error)]
pub enum AuditStoreError {
    #[error("Transaction log not found: {0}")]
    NotFound(String),

    #[error("Transaction log already exists: {0}")]
    Duplicate(String),

    #[error(transparent)]
    InvalidTransition(DomainError),

    #[error("Invalid transaction log row: {0}")]
    InvalidRow(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
