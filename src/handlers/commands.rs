//! Command definitions
//!
//! Commands represent intentions to change the system state.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{TransactionMessage, TransactionStatus};

// =========================================================================
// SubmitTransactionCommand
// =========================================================================

/// Request to move money on an account, accepted from an outer surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTransactionCommand {
    /// Caller-chosen id; generated when absent
    pub transaction_id: Option<String>,
    pub account_number: String,
    /// Amount as a string for precise decimal parsing
    pub amount: String,
    /// DEPOSIT or WITHDRAWAL
    pub transaction_type: String,
    pub memo: Option<String>,
    /// Id of the initiating principal, 0 when unknown
    pub initiated_by: i64,
}

impl SubmitTransactionCommand {
    pub fn new(account_number: String, amount: String, transaction_type: String) -> Self {
        Self {
            transaction_id: None,
            account_number,
            amount,
            transaction_type,
            memo: None,
            initiated_by: 0,
        }
    }

    pub fn with_transaction_id(mut self, transaction_id: String) -> Self {
        self.transaction_id = Some(transaction_id);
        self
    }

    pub fn with_memo(mut self, memo: String) -> Self {
        self.memo = Some(memo);
        self
    }

    pub fn with_initiated_by(mut self, initiated_by: i64) -> Self {
        self.initiated_by = initiated_by;
        self
    }
}

// =========================================================================
// ProcessTransactionCommand
// =========================================================================

/// A decoded queue message, ready for the processing engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessTransactionCommand {
    pub transaction_id: String,
    pub account_number: String,
    pub amount: Decimal,
    /// Raw type string; unknown values fail processing
    pub transaction_type: String,
    /// Currency the publisher expected the account to hold
    pub currency: Option<String>,
    pub memo: Option<String>,
}

impl ProcessTransactionCommand {
    pub fn new(
        transaction_id: String,
        account_number: String,
        amount: Decimal,
        transaction_type: String,
    ) -> Self {
        Self {
            transaction_id,
            account_number,
            amount,
            transaction_type,
            currency: None,
            memo: None,
        }
    }

    pub fn with_currency(mut self, currency: String) -> Self {
        self.currency = Some(currency);
        self
    }

    pub fn with_memo(mut self, memo: String) -> Self {
        self.memo = Some(memo);
        self
    }
}

impl From<&TransactionMessage> for ProcessTransactionCommand {
    fn from(message: &TransactionMessage) -> Self {
        Self {
            transaction_id: message.id.clone(),
            account_number: message.account_number.clone(),
            amount: message.amount,
            transaction_type: message.transaction_type.clone(),
            currency: Some(message.currency.clone()).filter(|c| !c.is_empty()),
            memo: message.description.clone(),
        }
    }
}

// =========================================================================
// Results
// =========================================================================

/// Result of an accepted submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResult {
    pub transaction_id: String,
    pub account_number: String,
    pub amount: Decimal,
    pub status: TransactionStatus,
}

/// Result of processing one transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// Balance committed and audit record marked COMPLETED
    Completed {
        transaction_id: String,
        new_balance: Decimal,
    },
    /// Balance committed but the audit record could not be marked COMPLETED
    AuditPending {
        transaction_id: String,
        new_balance: Decimal,
        reason: String,
    },
}

impl ProcessOutcome {
    pub fn transaction_id(&self) -> &str {
        match self {
            ProcessOutcome::Completed { transaction_id, .. }
            | ProcessOutcome::AuditPending { transaction_id, .. } => transaction_id,
        }
    }

    pub fn new_balance(&self) -> Decimal {
        match self {
            ProcessOutcome::Completed { new_balance, .. }
            | ProcessOutcome::AuditPending { new_balance, .. } => *new_balance,
        }
    }
}
