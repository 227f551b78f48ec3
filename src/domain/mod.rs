//! Domain module
//!
//! Core domain types and business logic.

pub mod account;
pub mod amount;
pub mod error;
pub mod message;
pub mod transaction;

pub use account::{Account, AccountStatus, AccountType};
pub use amount::{Amount, AmountError, Balance};
pub use error::DomainError;
pub use message::TransactionMessage;
pub use transaction::{
    HistoryFilter, HistoryPage, Metadata, MetadataValue, Pagination, TransactionLog,
    TransactionStatus, TransactionStatusView, TransactionType,
};
