//! Ledger Store
//!
//! Authoritative account balances. Every mutation happens inside a
//! `LedgerTransaction` that holds an exclusive lock on the account row until
//! it is committed or dropped. Dropping a transaction without committing
//! rolls it back.

mod memory;
mod repository;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::Account;

pub use memory::InMemoryLedger;
pub use repository::PgLedgerStore;

/// Read-only account lookup consumed from the account service
#[async_trait]
pub trait AccountLookup: Send + Sync {
    async fn get_by_account_number(&self, account_number: &str) -> Result<Account, LedgerError>;
}

/// Store that can open units of work against account rows
#[async_trait]
pub trait LedgerStore: AccountLookup {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, LedgerError>;
}

/// A unit of work against the ledger
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Acquire an exclusive lock on the account row and return its current
    /// state. Blocks while another unit of work holds the lock, up to the
    /// store's lock timeout.
    async fn lock_account(&mut self, account_number: &str) -> Result<Account, LedgerError>;

    /// Write a new balance for an account locked by this unit of work
    async fn update_balance(&mut self, account_id: i64, new_balance: Decimal) -> Result<(), LedgerError>;

    async fn commit(self: Box<Self>) -> Result<(), LedgerError>;

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError>;
}

/// Ledger store errors
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Lock not acquired: {0}")]
    LockTimeout(String),

    #[error("Serialization failure: {0}")]
    SerializationFailure(String),

    #[error("No account row updated for id {0}")]
    NoRowsUpdated(i64),

    #[error("Invalid account row: {0}")]
    InvalidRow(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        match crate::db::classify(&err) {
            crate::db::SqlFailure::LockNotAvailable => LedgerError::LockTimeout(err.to_string()),
            crate::db::SqlFailure::SerializationFailure => {
                LedgerError::SerializationFailure(err.to_string())
            }
            _ => LedgerError::Database(err),
        }
    }
}
