//! Amount and Balance types
//!
//! Domain primitives for monetary values. All arithmetic is exact decimal
//! arithmetic on `rust_decimal::Decimal`; nothing in this module rounds.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::DomainError;

/// Amount represents a validated, strictly positive monetary value.
///
/// # Invariants
/// - Value is always positive (> 0)
/// - Scale is preserved exactly as supplied
///
/// # Example
/// ```
/// use rust_decimal::Decimal;
/// use queue_ledger::domain::Amount;
///
/// let amount = Amount::new(Decimal::new(12550, 2)).unwrap();
/// assert_eq!(amount.value(), Decimal::new(12550, 2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

/// Errors that can occur when creating an Amount
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("Amount must be positive (got {0})")]
    NotPositive(Decimal),

    #[error("Invalid amount format: {0}")]
    ParseError(String),
}

impl Amount {
    /// Create a new Amount with validation.
    ///
    /// # Errors
    /// - `AmountError::NotPositive` if value <= 0
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value <= Decimal::ZERO {
            return Err(AmountError::NotPositive(value));
        }
        Ok(Self(value))
    }

    /// Get the underlying Decimal value.
    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal = Decimal::from_str(s.trim())
            .map_err(|e| AmountError::ParseError(e.to_string()))?;
        Amount::new(decimal)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Amount::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

/// Balance represents the authoritative balance held on an account row.
///
/// Unlike `Amount`, a balance may be zero. Whether it may drop below a given
/// floor is decided by the caller through the `reserve` argument of `debit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Balance(Decimal);

impl Balance {
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Add amount to balance
    pub fn credit(&self, amount: &Amount) -> Result<Balance, DomainError> {
        self.0
            .checked_add(amount.value())
            .map(Balance)
            .ok_or(DomainError::Overflow)
    }

    /// Subtract amount from balance, refusing to go below `reserve`.
    pub fn debit(&self, amount: &Amount, reserve: Decimal) -> Result<Balance, DomainError> {
        let new_value = self
            .0
            .checked_sub(amount.value())
            .ok_or(DomainError::Overflow)?;

        if new_value < reserve {
            return Err(DomainError::insufficient_funds(self.0, amount.value(), reserve));
        }

        Ok(Balance(new_value))
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
