//! Transaction types
//!
//! The audit record (`TransactionLog`), its status state machine, and the
//! query shapes used to read it back.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::DomainError;

// =========================================================================
// TransactionType
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEPOSIT",
            TransactionType::Withdrawal => "WITHDRAWAL",
        }
    }
}

impl FromStr for TransactionType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEPOSIT" => Ok(TransactionType::Deposit),
            "WITHDRAWAL" => Ok(TransactionType::Withdrawal),
            other => Err(DomainError::InvalidTransactionType(other.to_string())),
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =========================================================================
// TransactionStatus
// =========================================================================

/// Audit status. Moves forward only:
/// PENDING -> IN_PROGRESS -> {COMPLETED, FAILED}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::InProgress => "IN_PROGRESS",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Completed | TransactionStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            TransactionStatus::Pending => 0,
            TransactionStatus::InProgress => 1,
            TransactionStatus::Completed | TransactionStatus::Failed => 2,
        }
    }

    /// Whether `next` may be written over `self`.
    ///
    /// Re-applying the current status is allowed (and is a no-op for the
    /// caller). Skipping forward (PENDING -> FAILED) is allowed.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        if *self == next {
            return true;
        }
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TransactionStatus::Pending),
            "IN_PROGRESS" => Ok(TransactionStatus::InProgress),
            "COMPLETED" => Ok(TransactionStatus::Completed),
            "FAILED" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =========================================================================
// Metadata
// =========================================================================

/// Scalar values allowed in the audit record's extension map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Decimal(Decimal),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::String(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Integer(value)
    }
}

impl From<Decimal> for MetadataValue {
    fn from(value: Decimal) -> Self {
        MetadataValue::Decimal(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for MetadataValue {
    fn from(value: DateTime<Utc>) -> Self {
        MetadataValue::Timestamp(value)
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

// =========================================================================
// TransactionLog
// =========================================================================

/// Audit record for one transaction attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionLog {
    /// Document id in the audit store
    pub id: Uuid,
    /// Caller-supplied id, unique across the audit store
    pub transaction_id: String,
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub amount: Decimal,
    pub currency: String,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub memo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    pub initiated_by: i64,
    pub retry_count: i32,
}

impl TransactionLog {
    /// New PENDING record for a single-account operation
    pub fn new(
        transaction_id: impl Into<String>,
        account_id: i64,
        amount: Decimal,
        currency: impl Into<String>,
        transaction_type: TransactionType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id: transaction_id.into(),
            from_account_id: account_id,
            to_account_id: account_id,
            amount,
            currency: currency.into(),
            transaction_type,
            status: TransactionStatus::Pending,
            memo: String::new(),
            metadata: None,
            timestamp: Utc::now(),
            processed_at: None,
            initiated_by: 0,
            retry_count: 0,
        }
    }

    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = memo.into();
        self
    }

    pub fn with_initiated_by(mut self, initiated_by: i64) -> Self {
        self.initiated_by = initiated_by;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata
            .get_or_insert_with(Metadata::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn involves_account(&self, account_id: i64) -> bool {
        self.from_account_id == account_id || self.to_account_id == account_id
    }
}

/// Caller-facing view of a transaction's progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionStatusView {
    pub transaction_id: String,
    pub status: TransactionStatus,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub currency: String,
    pub timestamp: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl From<&TransactionLog> for TransactionStatusView {
    fn from(log: &TransactionLog) -> Self {
        Self {
            transaction_id: log.transaction_id.clone(),
            status: log.status,
            transaction_type: log.transaction_type,
            amount: log.amount,
            currency: log.currency.clone(),
            timestamp: log.timestamp,
            processed_at: log.processed_at,
        }
    }
}

// =========================================================================
// History queries
// =========================================================================

/// Optional filters for account history
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryFilter {
    /// Inclusive, from the start of this day (UTC)
    pub start_date: Option<NaiveDate>,
    /// Inclusive, through the end of this day (UTC)
    pub end_date: Option<NaiveDate>,
    pub status: Option<TransactionStatus>,
}

impl HistoryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_start_date(mut self, date: NaiveDate) -> Self {
        self.start_date = Some(date);
        self
    }

    pub fn with_end_date(mut self, date: NaiveDate) -> Self {
        self.end_date = Some(date);
        self
    }

    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Lower timestamp bound (inclusive)
    pub fn from_timestamp(&self) -> Option<DateTime<Utc>> {
        self.start_date
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    }

    /// Upper timestamp bound (exclusive): start of the day after `end_date`
    pub fn until_timestamp(&self) -> Option<DateTime<Utc>> {
        self.end_date
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc() + Duration::days(1))
    }

    pub fn matches(&self, log: &TransactionLog) -> bool {
        if let Some(from) = self.from_timestamp() {
            if log.timestamp < from {
                return false;
            }
        }
        if let Some(until) = self.until_timestamp() {
            if log.timestamp >= until {
                return false;
            }
        }
        if let Some(status) = self.status {
            if log.status != status {
                return false;
            }
        }
        true
    }
}

pub const DEFAULT_PAGE_LIMIT: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
}

impl Pagination {
    /// Non-positive limits fall back to the default; negative offsets to 0.
    pub fn new(limit: i64, offset: i64) -> Self {
        Self {
            limit: if limit > 0 { limit } else { DEFAULT_PAGE_LIMIT },
            offset: offset.max(0),
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_LIMIT, 0)
    }
}

/// One page of account history, newest first
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryPage {
    pub items: Vec<TransactionLog>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}
