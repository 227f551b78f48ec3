//! Submit Transaction Handler
//!
//! Accepts a transaction request, registers it as IN_PROGRESS and publishes
//! it for asynchronous processing.

use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{
    Amount, DomainError, TransactionLog, TransactionMessage, TransactionStatus, TransactionType,
};
use crate::error::{ProcessError, ProcessResult};
use crate::ledger::AccountLookup;
use crate::messaging::TransactionPublisher;
use crate::transaction_log::{AuditStoreError, TransactionLogService};

use super::{SubmitResult, SubmitTransactionCommand};

/// Handler for transaction submissions
#[derive(Clone)]
pub struct SubmitTransactionHandler {
    accounts: Arc<dyn AccountLookup>,
    logs: TransactionLogService,
    publisher: TransactionPublisher,
    reserve_precheck: Option<Decimal>,
}

impl SubmitTransactionHandler {
    pub fn new(
        accounts: Arc<dyn AccountLookup>,
        logs: TransactionLogService,
        publisher: TransactionPublisher,
    ) -> Self {
        Self {
            accounts,
            logs,
            publisher,
            reserve_precheck: None,
        }
    }

    /// Reject withdrawals up front when the current balance already cannot
    /// cover them. Advisory only: the engine re-checks under the row lock.
    pub fn with_reserve_precheck(mut self, minimum_reserve: Decimal) -> Self {
        self.reserve_precheck = Some(minimum_reserve);
        self
    }

    /// Execute the submit command
    pub async fn execute(&self, command: SubmitTransactionCommand) -> ProcessResult<SubmitResult> {
        if command.account_number.trim().is_empty() {
            return Err(ProcessError::Validation("account number is required".to_string()));
        }

        let transaction_type: TransactionType = command.transaction_type.parse()?;
        let amount: Amount = command
            .amount
            .parse()
            .map_err(|e| ProcessError::Validation(format!("Invalid amount: {}", e)))?;

        let account = self.accounts.get_by_account_number(&command.account_number).await?;

        if !account.is_active() {
            return Err(DomainError::AccountNotActive {
                account_number: account.account_number.clone(),
                status: account.account_status,
            }
            .into());
        }

        if let Some(reserve) = self.reserve_precheck {
            account.apply_transaction(transaction_type, &amount, reserve)?;
        }

        let transaction_id = command
            .transaction_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut log = TransactionLog::new(
            transaction_id.clone(),
            account.id,
            amount.value(),
            account.currency.clone(),
            transaction_type,
        )
        .with_status(TransactionStatus::InProgress)
        .with_initiated_by(command.initiated_by);
        if let Some(memo) = &command.memo {
            log = log.with_memo(memo.clone());
        }

        self.logs.create(&log).await.map_err(|e| match e {
            AuditStoreError::Duplicate(id) => {
                ProcessError::Validation(format!("transaction {} already submitted", id))
            }
            other => other.into(),
        })?;

        let mut message = TransactionMessage::new(
            transaction_id.clone(),
            transaction_type,
            account.account_number.clone(),
            amount.value(),
            account.currency.clone(),
        );
        if let Some(memo) = command.memo {
            message = message.with_description(memo);
        }

        if let Err(err) = self.publisher.publish(&message).await {
            if let Err(audit_err) = self
                .logs
                .update_status(&transaction_id, TransactionStatus::Failed)
                .await
            {
                tracing::error!(
                    transaction_id = %transaction_id,
                    error = %audit_err,
                    "Failed to mark unpublished transaction FAILED"
                );
            }
            tracing::error!(
                transaction_id = %transaction_id,
                error = %err,
                "Failed to publish transaction"
            );
            return Err(err.into());
        }

        tracing::info!(
            transaction_id = %transaction_id,
            account_number = %account.account_number,
            transaction_type = %transaction_type,
            amount = %amount,
            "Transaction submitted"
        );

        Ok(SubmitResult {
            transaction_id,
            account_number: account.account_number,
            amount: amount.value(),
            status: TransactionStatus::InProgress,
        })
    }
}
