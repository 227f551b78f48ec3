//! Transaction Query Handler
//!
//! Read side: transaction status by id and per-account history.

use std::sync::Arc;

use crate::domain::{HistoryFilter, HistoryPage, Pagination, TransactionLog, TransactionStatusView};
use crate::error::ProcessResult;
use crate::ledger::AccountLookup;
use crate::transaction_log::TransactionLogService;

#[derive(Clone)]
pub struct TransactionQueryHandler {
    accounts: Arc<dyn AccountLookup>,
    logs: TransactionLogService,
}

impl TransactionQueryHandler {
    pub fn new(accounts: Arc<dyn AccountLookup>, logs: TransactionLogService) -> Self {
        Self { accounts, logs }
    }

    pub async fn transaction(&self, transaction_id: &str) -> ProcessResult<TransactionLog> {
        Ok(self.logs.get_by_transaction_id(transaction_id).await?)
    }

    pub async fn status(&self, transaction_id: &str) -> ProcessResult<TransactionStatusView> {
        Ok(self.logs.get_status(transaction_id).await?)
    }

    /// History of an account, newest first
    pub async fn history(
        &self,
        account_number: &str,
        filter: &HistoryFilter,
        page: Pagination,
    ) -> ProcessResult<HistoryPage> {
        let account = self.accounts.get_by_account_number(account_number).await?;
        Ok(self.logs.get_history(account.id, filter, page).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Account, AccountType, TransactionStatus, TransactionType};
    use crate::error::ErrorKind;
    use crate::ledger::InMemoryLedger;
    use crate::transaction_log::InMemoryAuditStore;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_history_by_account_number() {
        let ledger = InMemoryLedger::new();
        let account = ledger.insert(Account::new(0, "ACC-1", dec!(0), "USD", AccountType::Checking));
        let other = ledger.insert(Account::new(0, "ACC-2", dec!(0), "USD", AccountType::Checking));

        let logs = TransactionLogService::new(Arc::new(InMemoryAuditStore::new()));
        for i in 0..3 {
            logs.create(&TransactionLog::new(
                format!("tx-{}", i),
                account.id,
                dec!(1),
                "USD",
                TransactionType::Deposit,
            ))
            .await
            .unwrap();
        }
        logs.create(&TransactionLog::new("tx-other", other.id, dec!(1), "USD", TransactionType::Deposit))
            .await
            .unwrap();

        let handler = TransactionQueryHandler::new(Arc::new(ledger), logs);

        let page = handler
            .history("ACC-1", &HistoryFilter::new(), Pagination::new(2, 0))
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);

        let status = handler.status("tx-other").await.unwrap();
        assert_eq!(status.status, TransactionStatus::Pending);

        let err = handler
            .history("ACC-404", &HistoryFilter::new(), Pagination::new(10, 0))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = handler.status("missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
