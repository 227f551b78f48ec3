//! Queue message
//!
//! Wire shape of a transaction request travelling over the queue.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Amount, DomainError, TransactionType};

/// A transaction request as published to and consumed from the queue.
///
/// `transaction_type` stays a raw string on the wire so that an unknown type
/// still decodes and reaches the engine, which records it as FAILED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub transaction_type: String,
    pub account_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_account_number: Option<String>,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TransactionMessage {
    pub fn new(
        id: impl Into<String>,
        transaction_type: TransactionType,
        account_number: impl Into<String>,
        amount: Decimal,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            transaction_type: transaction_type.as_str().to_string(),
            account_number: account_number.into(),
            to_account_number: None,
            amount,
            currency: currency.into(),
            description: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Parsed transaction type
    pub fn parsed_type(&self) -> Result<TransactionType, DomainError> {
        self.transaction_type.parse()
    }

    /// Validated amount
    pub fn parsed_amount(&self) -> Result<Amount, DomainError> {
        Amount::new(self.amount).map_err(|e| DomainError::InvalidAmount(e.to_string()))
    }

    /// Checks the fields a publisher must never send without.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("transaction id is required".to_string());
        }
        if self.account_number.trim().is_empty() {
            return Err("account number is required".to_string());
        }
        self.parsed_amount().map_err(|e| e.to_string())?;
        self.parsed_type().map_err(|e| e.to_string())?;
        Ok(())
    }
}
