//! Error handling module
//!
//! The error taxonomy of the transaction pipeline and its retry policy.

use crate::domain::DomainError;
use crate::ledger::LedgerError;
use crate::messaging::{PublishError, TransportError};
use crate::transaction_log::AuditStoreError;

/// Pipeline-wide Result type
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Coarse classification handed to callers (the HTTP layer maps these to
/// status codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    InsufficientFunds,
    InvalidTransactionType,
    AccountNotActive,
    LockTimeout,
    SerializationFailure,
    Decode,
    Transport,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::InvalidTransactionType => "invalid_transaction_type",
            ErrorKind::AccountNotActive => "account_not_active",
            ErrorKind::LockTimeout => "lock_timeout",
            ErrorKind::SerializationFailure => "serialization_failure",
            ErrorKind::Decode => "decode_failure",
            ErrorKind::Transport => "transport_failure",
            ErrorKind::Internal => "internal_error",
        }
    }
}

/// Errors produced while submitting or processing a transaction
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    #[error("Serialization failure: {0}")]
    SerializationFailure(String),

    #[error("Decode failure: {0}")]
    Decode(String),

    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProcessError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProcessError::Validation(_) => ErrorKind::Validation,
            ProcessError::NotFound(_) => ErrorKind::NotFound,
            ProcessError::Domain(domain) => match domain {
                DomainError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
                DomainError::InvalidTransactionType(_) => ErrorKind::InvalidTransactionType,
                DomainError::AccountNotActive { .. } => ErrorKind::AccountNotActive,
                DomainError::Overflow => ErrorKind::Internal,
                DomainError::InvalidAmount(_)
                | DomainError::CurrencyMismatch { .. }
                | DomainError::InvalidStatusTransition { .. } => ErrorKind::Validation,
            },
            ProcessError::LockTimeout(_) => ErrorKind::LockTimeout,
            ProcessError::SerializationFailure(_) => ErrorKind::SerializationFailure,
            ProcessError::Decode(_) => ErrorKind::Decode,
            ProcessError::Transport(_) => ErrorKind::Transport,
            ProcessError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether requeueing the message may lead to a different outcome.
    ///
    /// Decode and business failures are terminal; lock contention,
    /// conflicts, broker trouble and unexpected store failures may clear.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::LockTimeout
                | ErrorKind::SerializationFailure
                | ErrorKind::Transport
                | ErrorKind::Internal
        )
    }
}

impl From<LedgerError> for ProcessError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AccountNotFound(number) => {
                ProcessError::NotFound(format!("account {}", number))
            }
            LedgerError::LockTimeout(msg) => ProcessError::LockTimeout(msg),
            LedgerError::SerializationFailure(msg) => ProcessError::SerializationFailure(msg),
            other => ProcessError::Internal(other.to_string()),
        }
    }
}

impl From<AuditStoreError> for ProcessError {
    fn from(err: AuditStoreError) -> Self {
        match err {
            AuditStoreError::NotFound(id) => ProcessError::NotFound(format!("transaction {}", id)),
            AuditStoreError::InvalidTransition(domain) => ProcessError::Domain(domain),
            other => ProcessError::Internal(other.to_string()),
        }
    }
}

impl From<PublishError> for ProcessError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::Validation(msg) => ProcessError::Validation(msg),
            PublishError::Serialization(e) => ProcessError::Internal(e.to_string()),
            PublishError::Transport(e) => ProcessError::Transport(e),
        }
    }
}
