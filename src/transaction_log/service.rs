//! Transaction Log Service
//!
//! Owns the audit record's status state machine. Transitions only move
//! forward (PENDING -> IN_PROGRESS -> COMPLETED | FAILED); re-applying the
//! current status is a no-op. The check is read-then-write, so two writers
//! racing on the same id resolve as last-write-wins.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::domain::{
    DomainError, HistoryFilter, HistoryPage, Pagination, TransactionLog, TransactionStatus,
    TransactionStatusView,
};

use super::{AuditStore, AuditStoreError};

/// What `update_status` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    Applied {
        from: TransactionStatus,
        to: TransactionStatus,
    },
    Unchanged(TransactionStatus),
}

#[derive(Clone)]
pub struct TransactionLogService {
    store: Arc<dyn AuditStore>,
}

impl TransactionLogService {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Record a new transaction attempt
    pub async fn create(&self, log: &TransactionLog) -> Result<(), AuditStoreError> {
        self.store.insert(log).await?;

        tracing::debug!(
            transaction_id = %log.transaction_id,
            status = %log.status,
            "Transaction log created"
        );

        Ok(())
    }

    /// Move a record to `status`, enforcing forward-only transitions
    pub async fn update_status(
        &self,
        transaction_id: &str,
        status: TransactionStatus,
    ) -> Result<StatusChange, AuditStoreError> {
        let current = self.get_by_transaction_id(transaction_id).await?.status;

        if current == status {
            return Ok(StatusChange::Unchanged(current));
        }

        if !current.can_transition_to(status) {
            return Err(AuditStoreError::InvalidTransition(
                DomainError::InvalidStatusTransition {
                    from: current,
                    to: status,
                },
            ));
        }

        let processed_at = status.is_terminal().then(Utc::now);
        self.store
            .set_status(transaction_id, status, processed_at)
            .await?;

        tracing::debug!(
            transaction_id = %transaction_id,
            from = %current,
            to = %status,
            "Transaction status updated"
        );

        Ok(StatusChange::Applied {
            from: current,
            to: status,
        })
    }

    /// Make sure a record exists and is at least IN_PROGRESS.
    ///
    /// Creates `template` as IN_PROGRESS when no record exists, advances a
    /// PENDING record, and returns terminal records untouched.
    pub async fn begin_attempt(&self, template: TransactionLog) -> Result<TransactionLog, AuditStoreError> {
        let transaction_id = template.transaction_id.clone();

        match self.store.find_by_transaction_id(&transaction_id).await? {
            None => {
                let log = template.with_status(TransactionStatus::InProgress);
                match self.create(&log).await {
                    Ok(()) => Ok(log),
                    // Another writer registered it first
                    Err(AuditStoreError::Duplicate(_)) => self.get_by_transaction_id(&transaction_id).await,
                    Err(e) => Err(e),
                }
            }
            Some(mut log) if log.status == TransactionStatus::Pending => {
                self.update_status(&transaction_id, TransactionStatus::InProgress)
                    .await?;
                log.status = TransactionStatus::InProgress;
                Ok(log)
            }
            Some(log) => Ok(log),
        }
    }

    pub async fn get_by_transaction_id(&self, transaction_id: &str) -> Result<TransactionLog, AuditStoreError> {
        self.store
            .find_by_transaction_id(transaction_id)
            .await?
            .ok_or_else(|| AuditStoreError::NotFound(transaction_id.to_string()))
    }

    pub async fn get_status(&self, transaction_id: &str) -> Result<TransactionStatusView, AuditStoreError> {
        let log = self.get_by_transaction_id(transaction_id).await?;
        Ok(TransactionStatusView::from(&log))
    }

    pub async fn get_history(
        &self,
        account_id: i64,
        filter: &HistoryFilter,
        page: Pagination,
    ) -> Result<HistoryPage, AuditStoreError> {
        let (items, total) = self.store.history(account_id, filter, page).await?;

        Ok(HistoryPage {
            items,
            total,
            limit: page.limit,
            offset: page.offset,
        })
    }

    pub async fn increment_retry(&self, transaction_id: &str) -> Result<i32, AuditStoreError> {
        self.store.increment_retry_count(transaction_id).await
    }

    /// IN_PROGRESS records older than `older_than`: candidates for the
    /// ledger/audit gap left by a crash between commit and status update.
    pub async fn find_stale_in_progress(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TransactionLog>, AuditStoreError> {
        self.store
            .find_by_status_before(TransactionStatus::InProgress, older_than, limit)
            .await
    }
}
