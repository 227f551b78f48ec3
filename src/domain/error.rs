//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use rust_decimal::Decimal;
use thiserror::Error;

use super::{AccountStatus, TransactionStatus};

/// Business rule violations and domain invariant failures.
///
/// Every variant is terminal: resubmitting the same transaction would not
/// change the outcome.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Withdrawal would take the balance below the minimum reserve
    #[error("Insufficient funds: balance {balance}, requested {requested}, reserve {reserve}")]
    InsufficientFunds {
        balance: Decimal,
        requested: Decimal,
        reserve: Decimal,
    },

    /// Transaction type is not one of DEPOSIT / WITHDRAWAL
    #[error("Invalid transaction type: {0}")]
    InvalidTransactionType(String),

    /// Account is frozen or closed
    #[error("Account {account_number} is not active ({status})")]
    AccountNotActive {
        account_number: String,
        status: AccountStatus,
    },

    /// Invalid amount (zero, negative, unparsable)
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Currency mismatch: account holds {expected}, transaction is {found}")]
    CurrencyMismatch { expected: String, found: String },

    /// Audit status would move backwards or out of a terminal state
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStatusTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// Decimal arithmetic exceeded the representable range
    #[error("Arithmetic overflow")]
    Overflow,
}

impl DomainError {
    pub fn insufficient_funds(balance: Decimal, requested: Decimal, reserve: Decimal) -> Self {
        Self::InsufficientFunds {
            balance,
            requested,
            reserve,
        }
    }
}
