//! queue_ledger Library
//!
//! Re-exports modules for integration testing and external use.

pub mod domain;
pub mod handlers;
pub mod jobs;
pub mod ledger;
pub mod messaging;
pub mod transaction_log;

pub mod config;
pub mod db;
mod error;

pub use config::Config;
pub use domain::{Amount, AmountError, Balance, DomainError};
pub use domain::{TransactionLog, TransactionMessage, TransactionStatus, TransactionType};
pub use error::{ErrorKind, ProcessError, ProcessResult};
