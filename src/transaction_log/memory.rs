//! In-memory audit store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::domain::{HistoryFilter, Pagination, TransactionLog, TransactionStatus};

use super::{AuditStore, AuditStoreError};

#[derive(Clone, Default)]
pub struct InMemoryAuditStore {
    logs: Arc<RwLock<HashMap<String, TransactionLog>>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.logs.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn insert(&self, log: &TransactionLog) -> Result<(), AuditStoreError> {
        let mut logs = self.logs.write().unwrap_or_else(|e| e.into_inner());
        if logs.contains_key(&log.transaction_id) {
            return Err(AuditStoreError::Duplicate(log.transaction_id.clone()));
        }
        logs.insert(log.transaction_id.clone(), log.clone());
        Ok(())
    }

    async fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<TransactionLog>, AuditStoreError> {
        let logs = self.logs.read().unwrap_or_else(|e| e.into_inner());
        Ok(logs.get(transaction_id).cloned())
    }

    async fn set_status(
        &self,
        transaction_id: &str,
        status: TransactionStatus,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<(), AuditStoreError> {
        let mut logs = self.logs.write().unwrap_or_else(|e| e.into_inner());
        let log = logs
            .get_mut(transaction_id)
            .ok_or_else(|| AuditStoreError::NotFound(transaction_id.to_string()))?;

        log.status = status;
        if processed_at.is_some() {
            log.processed_at = processed_at;
        }
        Ok(())
    }

    async fn increment_retry_count(&self, transaction_id: &str) -> Result<i32, AuditStoreError> {
        let mut logs = self.logs.write().unwrap_or_else(|e| e.into_inner());
        let log = logs
            .get_mut(transaction_id)
            .ok_or_else(|| AuditStoreError::NotFound(transaction_id.to_string()))?;

        log.retry_count += 1;
        Ok(log.retry_count)
    }

    async fn history(
        &self,
        account_id: i64,
        filter: &HistoryFilter,
        page: Pagination,
    ) -> Result<(Vec<TransactionLog>, i64), AuditStoreError> {
        let logs = self.logs.read().unwrap_or_else(|e| e.into_inner());

        let mut matching: Vec<&TransactionLog> = logs
            .values()
            .filter(|log| log.involves_account(account_id) && filter.matches(log))
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .cloned()
            .collect();

        Ok((items, total))
    }

    async fn find_by_status_before(
        &self,
        status: TransactionStatus,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TransactionLog>, AuditStoreError> {
        let logs = self.logs.read().unwrap_or_else(|e| e.into_inner());

        let mut matching: Vec<TransactionLog> = logs
            .values()
            .filter(|log| log.status == status && log.timestamp < older_than)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        matching.truncate(limit.max(0) as usize);

        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransactionType;
    use chrono::{Duration, NaiveDate};
    use rust_decimal_macros::dec;

    fn log_at(id: &str, account_id: i64, timestamp: DateTime<Utc>) -> TransactionLog {
        let mut log = TransactionLog::new(id, account_id, dec!(5), "USD", TransactionType::Deposit);
        log.timestamp = timestamp;
        log
    }

    #[tokio::test]
    async fn test_history_orders_and_pages() {
        let store = InMemoryAuditStore::new();
        let base = NaiveDate::from_ymd_opt(2026, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            .and_utc();

        for i in 0..5 {
            store
                .insert(&log_at(&format!("tx-{}", i), 1, base + Duration::days(i)))
                .await
                .unwrap();
        }
        store.insert(&log_at("other", 2, base)).await.unwrap();

        let (items, total) = store
            .history(1, &HistoryFilter::new(), Pagination::new(2, 1))
            .await
            .unwrap();

        assert_eq!(total, 5);
        let ids: Vec<_> = items.iter().map(|l| l.transaction_id.as_str()).collect();
        assert_eq!(ids, vec!["tx-3", "tx-2"]);
    }

    #[tokio::test]
    async fn test_history_filters() {
        let store = InMemoryAuditStore::new();
        let day = NaiveDate::from_ymd_opt(2026, 5, 3).unwrap();
        let noon = day.and_hms_opt(12, 0, 0).unwrap().and_utc();

        store.insert(&log_at("before", 1, noon - Duration::days(1))).await.unwrap();
        store.insert(&log_at("on", 1, noon)).await.unwrap();
        store
            .insert(&log_at("failed", 1, noon).with_status(TransactionStatus::Failed))
            .await
            .unwrap();

        let filter = HistoryFilter::new().with_start_date(day).with_end_date(day);
        let (_, total) = store.history(1, &filter, Pagination::default()).await.unwrap();
        assert_eq!(total, 2);

        let filter = filter.with_status(TransactionStatus::Failed);
        let (items, total) = store.history(1, &filter, Pagination::default()).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(items[0].transaction_id, "failed");
    }

    #[tokio::test]
    async fn test_retry_count() {
        let store = InMemoryAuditStore::new();
        store.insert(&log_at("r", 1, Utc::now())).await.unwrap();

        assert_eq!(store.increment_retry_count("r").await.unwrap(), 1);
        assert_eq!(store.increment_retry_count("r").await.unwrap(), 2);
        assert!(matches!(
            store.increment_retry_count("missing").await,
            Err(AuditStoreError::NotFound(_))
        ));
    }
}
