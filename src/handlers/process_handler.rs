//! Process Transaction Handler
//!
//! The processing engine. Applies one transaction to the ledger under an
//! exclusive account lock and reconciles the audit record with the outcome.
//!
//! The ledger commit and the audit update are not atomic. A crash between
//! them leaves the record IN_PROGRESS with the balance already changed; the
//! maintenance job reports such records.

use rust_decimal::Decimal;
use std::sync::Arc;

use crate::domain::{
    Amount, DomainError, TransactionLog, TransactionMessage, TransactionStatus, TransactionType,
};
use crate::error::{ProcessError, ProcessResult};
use crate::ledger::{AccountLookup, LedgerStore, LedgerTransaction};
use crate::transaction_log::{AuditStoreError, TransactionLogService};

use super::{ProcessOutcome, ProcessTransactionCommand};

/// Handler that applies queued transactions to the ledger
#[derive(Clone)]
pub struct ProcessTransactionHandler {
    ledger: Arc<dyn LedgerStore>,
    logs: TransactionLogService,
    minimum_reserve: Decimal,
}

impl ProcessTransactionHandler {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        logs: TransactionLogService,
        minimum_reserve: Decimal,
    ) -> Self {
        Self {
            ledger,
            logs,
            minimum_reserve,
        }
    }

    /// Process a decoded queue message
    pub async fn process(&self, message: &TransactionMessage) -> ProcessResult<ProcessOutcome> {
        self.execute(ProcessTransactionCommand::from(message)).await
    }

    /// Execute the process command.
    ///
    /// On success the balance change is committed. On failure nothing is
    /// committed; terminal failures mark the audit record FAILED and
    /// retryable ones leave it IN_PROGRESS with its retry count bumped.
    pub async fn execute(&self, command: ProcessTransactionCommand) -> ProcessResult<ProcessOutcome> {
        let transaction_id = command.transaction_id.clone();

        tracing::debug!(
            transaction_id = %transaction_id,
            account_number = %command.account_number,
            transaction_type = %command.transaction_type,
            amount = %command.amount,
            "Processing transaction"
        );

        match self.apply(&command).await {
            Ok(new_balance) => Ok(self.complete(transaction_id, new_balance).await),
            Err(err) => {
                self.record_failure(&transaction_id, &err).await;
                Err(err)
            }
        }
    }

    /// Register the attempt, then run the unit of work; commit on success,
    /// roll back otherwise.
    ///
    /// The audit record is written before the ledger transaction opens, so a
    /// call never holds a locked connection while waiting for another one.
    async fn apply(&self, command: &ProcessTransactionCommand) -> ProcessResult<Decimal> {
        let transaction_type: TransactionType = command.transaction_type.parse()?;
        let amount =
            Amount::new(command.amount).map_err(|e| DomainError::InvalidAmount(e.to_string()))?;

        let account = self.ledger.get_by_account_number(&command.account_number).await?;

        // Used only when no submitter registered the transaction
        let mut template = TransactionLog::new(
            command.transaction_id.clone(),
            account.id,
            amount.value(),
            account.currency.clone(),
            transaction_type,
        )
        .with_metadata("registered_by", "processor");
        if let Some(memo) = &command.memo {
            template = template.with_memo(memo.clone());
        }
        self.logs.begin_attempt(template).await?;

        let mut tx = self.ledger.begin().await?;

        match self
            .apply_locked(tx.as_mut(), command, transaction_type, &amount)
            .await
        {
            Ok(new_balance) => {
                tx.commit().await?;
                Ok(new_balance)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(
                        transaction_id = %command.transaction_id,
                        error = %rollback_err,
                        "Rollback failed"
                    );
                }
                Err(err)
            }
        }
    }

    async fn apply_locked(
        &self,
        tx: &mut dyn LedgerTransaction,
        command: &ProcessTransactionCommand,
        transaction_type: TransactionType,
        amount: &Amount,
    ) -> ProcessResult<Decimal> {
        let account = tx.lock_account(&command.account_number).await?;

        if let Some(currency) = command.currency.as_deref() {
            if currency != account.currency {
                return Err(DomainError::CurrencyMismatch {
                    expected: account.currency.clone(),
                    found: currency.to_string(),
                }
                .into());
            }
        }

        let new_balance = account.apply_transaction(transaction_type, amount, self.minimum_reserve)?;
        tx.update_balance(account.id, new_balance).await?;

        Ok(new_balance)
    }

    async fn complete(&self, transaction_id: String, new_balance: Decimal) -> ProcessOutcome {
        match self
            .logs
            .update_status(&transaction_id, TransactionStatus::Completed)
            .await
        {
            Ok(_) => {
                tracing::info!(
                    transaction_id = %transaction_id,
                    new_balance = %new_balance,
                    "Transaction completed"
                );
                ProcessOutcome::Completed {
                    transaction_id,
                    new_balance,
                }
            }
            Err(err) => {
                tracing::warn!(
                    transaction_id = %transaction_id,
                    new_balance = %new_balance,
                    error = %err,
                    "Ledger committed but audit record not marked COMPLETED"
                );
                ProcessOutcome::AuditPending {
                    transaction_id,
                    new_balance,
                    reason: err.to_string(),
                }
            }
        }
    }

    async fn record_failure(&self, transaction_id: &str, err: &ProcessError) {
        if err.is_retryable() {
            match self.logs.increment_retry(transaction_id).await {
                Ok(retry_count) => tracing::warn!(
                    transaction_id = %transaction_id,
                    kind = err.kind().as_str(),
                    retry_count,
                    error = %err,
                    "Transaction attempt failed, will retry"
                ),
                Err(AuditStoreError::NotFound(_)) => tracing::warn!(
                    transaction_id = %transaction_id,
                    kind = err.kind().as_str(),
                    error = %err,
                    "Transaction attempt failed before an audit record existed"
                ),
                Err(audit_err) => tracing::error!(
                    transaction_id = %transaction_id,
                    error = %err,
                    audit_error = %audit_err,
                    "Failed to record retry"
                ),
            }
            return;
        }

        match self
            .logs
            .update_status(transaction_id, TransactionStatus::Failed)
            .await
        {
            Ok(_) => tracing::warn!(
                transaction_id = %transaction_id,
                kind = err.kind().as_str(),
                error = %err,
                "Transaction failed"
            ),
            Err(AuditStoreError::NotFound(_)) => tracing::warn!(
                transaction_id = %transaction_id,
                kind = err.kind().as_str(),
                error = %err,
                "Transaction failed without an audit record"
            ),
            Err(audit_err) => tracing::error!(
                transaction_id = %transaction_id,
                error = %err,
                audit_error = %audit_err,
                "Failed to mark transaction FAILED"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Account, AccountStatus, AccountType};
    use crate::error::ErrorKind;
    use crate::ledger::InMemoryLedger;
    use crate::transaction_log::InMemoryAuditStore;
    use rust_decimal_macros::dec;

    fn setup(balance: Decimal) -> (ProcessTransactionHandler, InMemoryLedger, TransactionLogService) {
        let ledger = InMemoryLedger::new();
        ledger.insert(Account::new(0, "ACC-1", balance, "USD", AccountType::Checking));
        let logs = TransactionLogService::new(Arc::new(InMemoryAuditStore::new()));
        let handler = ProcessTransactionHandler::new(Arc::new(ledger.clone()), logs.clone(), dec!(100));
        (handler, ledger, logs)
    }

    fn command(id: &str, transaction_type: &str, amount: Decimal) -> ProcessTransactionCommand {
        ProcessTransactionCommand::new(id.into(), "ACC-1".into(), amount, transaction_type.into())
    }

    #[tokio::test]
    async fn test_deposit_completes() {
        let (handler, ledger, logs) = setup(dec!(1000));

        let outcome = handler.execute(command("tx-1", "DEPOSIT", dec!(500))).await.unwrap();

        assert_eq!(outcome.new_balance(), dec!(1500));
        assert!(matches!(outcome, ProcessOutcome::Completed { .. }));
        assert_eq!(ledger.balance_of("ACC-1"), Some(dec!(1500)));

        let log = logs.get_by_transaction_id("tx-1").await.unwrap();
        assert_eq!(log.status, TransactionStatus::Completed);
        assert!(log.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_withdrawal_respects_reserve() {
        let (handler, ledger, logs) = setup(dec!(1000));

        // 1000 - 950 = 50 < reserve 100
        let err = handler
            .execute(command("tx-1", "WITHDRAWAL", dec!(950)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
        assert_eq!(ledger.balance_of("ACC-1"), Some(dec!(1000)));
        assert_eq!(
            logs.get_by_transaction_id("tx-1").await.unwrap().status,
            TransactionStatus::Failed
        );

        // Leaving exactly the reserve is allowed
        let outcome = handler
            .execute(command("tx-2", "WITHDRAWAL", dec!(900)))
            .await
            .unwrap();
        assert_eq!(outcome.new_balance(), dec!(100));
    }

    #[tokio::test]
    async fn test_unknown_type_rolls_back() {
        let (handler, ledger, _) = setup(dec!(1000));

        let err = handler
            .execute(command("tx-1", "TRANSFER", dec!(10)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransactionType);
        assert!(!err.is_retryable());
        assert_eq!(ledger.balance_of("ACC-1"), Some(dec!(1000)));
    }

    #[tokio::test]
    async fn test_malformed_command_fails_registered_record_only() {
        let (handler, _, logs) = setup(dec!(1000));
        logs.create(
            &TransactionLog::new("tx-1", 1, dec!(10), "USD", TransactionType::Deposit)
                .with_status(TransactionStatus::InProgress),
        )
        .await
        .unwrap();

        let err = handler
            .execute(command("tx-1", "TRANSFER", dec!(10)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransactionType);
        assert_eq!(
            logs.get_status("tx-1").await.unwrap().status,
            TransactionStatus::Failed
        );

        // Nothing valid to record for an unregistered message
        let err = handler
            .execute(command("tx-2", "DEPOSIT", dec!(0)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(logs.get_by_transaction_id("tx-2").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_account_is_not_found() {
        let (handler, _, _) = setup(dec!(1000));

        let err = handler
            .execute(ProcessTransactionCommand::new(
                "tx-1".into(),
                "NOPE".into(),
                dec!(10),
                "DEPOSIT".into(),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_currency_mismatch_fails() {
        let (handler, ledger, logs) = setup(dec!(1000));

        let err = handler
            .execute(command("tx-1", "DEPOSIT", dec!(10)).with_currency("EUR".into()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessError::Domain(DomainError::CurrencyMismatch { .. })
        ));
        assert_eq!(ledger.balance_of("ACC-1"), Some(dec!(1000)));
        assert_eq!(
            logs.get_by_transaction_id("tx-1").await.unwrap().status,
            TransactionStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_frozen_account_rejected() {
        let ledger = InMemoryLedger::new();
        ledger.insert(
            Account::new(0, "ACC-F", dec!(1000), "USD", AccountType::Savings)
                .with_status(AccountStatus::Frozen),
        );
        let logs = TransactionLogService::new(Arc::new(InMemoryAuditStore::new()));
        let handler = ProcessTransactionHandler::new(Arc::new(ledger.clone()), logs, dec!(100));

        let err = handler
            .execute(ProcessTransactionCommand::new(
                "tx-1".into(),
                "ACC-F".into(),
                dec!(10),
                "DEPOSIT".into(),
            ))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessError::Domain(DomainError::AccountNotActive { .. })
        ));
        assert_eq!(ledger.balance_of("ACC-F"), Some(dec!(1000)));
    }

    #[tokio::test]
    async fn test_pre_registered_record_is_advanced() {
        let (handler, _, logs) = setup(dec!(1000));
        logs.create(&TransactionLog::new("tx-1", 1, dec!(5), "USD", TransactionType::Deposit))
            .await
            .unwrap();

        handler.execute(command("tx-1", "DEPOSIT", dec!(5))).await.unwrap();

        assert_eq!(
            logs.get_status("tx-1").await.unwrap().status,
            TransactionStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_failed_record_reports_audit_pending() {
        let (handler, ledger, logs) = setup(dec!(1000));
        logs.create(
            &TransactionLog::new("tx-1", 1, dec!(5), "USD", TransactionType::Deposit)
                .with_status(TransactionStatus::Failed),
        )
        .await
        .unwrap();

        let outcome = handler.execute(command("tx-1", "DEPOSIT", dec!(5))).await.unwrap();

        assert!(matches!(outcome, ProcessOutcome::AuditPending { .. }));
        assert_eq!(ledger.balance_of("ACC-1"), Some(dec!(1005)));
        assert_eq!(
            logs.get_status("tx-1").await.unwrap().status,
            TransactionStatus::Failed
        );
    }
}
