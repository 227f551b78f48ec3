//! Account
//!
//! The authoritative account row held by the ledger store, and the pure
//! balance computation applied to it while it is locked.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{Amount, Balance, DomainError, TransactionType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountType {
    Checking,
    Savings,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Checking => "CHECKING",
            AccountType::Savings => "SAVINGS",
        }
    }
}

impl FromStr for AccountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CHECKING" => Ok(AccountType::Checking),
            "SAVINGS" => Ok(AccountType::Savings),
            other => Err(format!("unknown account type: {}", other)),
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Active,
    Frozen,
    Closed,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "ACTIVE",
            AccountStatus::Frozen => "FROZEN",
            AccountStatus::Closed => "CLOSED",
        }
    }
}

impl FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(AccountStatus::Active),
            "FROZEN" => Ok(AccountStatus::Frozen),
            "CLOSED" => Ok(AccountStatus::Closed),
            other => Err(format!("unknown account status: {}", other)),
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account row as stored in the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub account_number: String,
    pub first_name: String,
    pub last_name: String,
    pub balance: Decimal,
    pub currency: String,
    pub account_type: AccountType,
    pub account_status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Build a new ACTIVE account. Used by seeding code and tests; account
    /// creation proper lives outside this crate.
    pub fn new(
        id: i64,
        account_number: impl Into<String>,
        balance: Decimal,
        currency: impl Into<String>,
        account_type: AccountType,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            account_number: account_number.into(),
            first_name: String::new(),
            last_name: String::new(),
            balance,
            currency: currency.into(),
            account_type,
            account_status: AccountStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: AccountStatus) -> Self {
        self.account_status = status;
        self
    }

    pub fn is_active(&self) -> bool {
        self.account_status == AccountStatus::Active
    }

    /// Compute the balance that results from applying a transaction.
    ///
    /// Deposits add; withdrawals subtract and must leave at least `reserve`.
    /// The account itself is not modified.
    pub fn apply_transaction(
        &self,
        transaction_type: TransactionType,
        amount: &Amount,
        reserve: Decimal,
    ) -> Result<Decimal, DomainError> {
        if !self.is_active() {
            return Err(DomainError::AccountNotActive {
                account_number: self.account_number.clone(),
                status: self.account_status,
            });
        }

        let balance = Balance::new(self.balance);
        let new_balance = match transaction_type {
            TransactionType::Deposit => balance.credit(amount)?,
            TransactionType::Withdrawal => balance.debit(amount, reserve)?,
        };

        Ok(new_balance.value())
    }
}
