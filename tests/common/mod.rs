//! Common test utilities
#![allow(dead_code)]

use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use queue_ledger::domain::{Account, AccountType, TransactionStatus};
use queue_ledger::handlers::{ProcessTransactionHandler, SubmitTransactionHandler};
use queue_ledger::ledger::InMemoryLedger;
use queue_ledger::messaging::{
    ConsumerConfig, InMemoryQueue, QueueTransport, TransactionConsumer, TransactionPublisher,
};
use queue_ledger::transaction_log::{InMemoryAuditStore, TransactionLogService};

pub const QUEUE: &str = "transactions";

/// In-memory pipeline: ledger, queue, audit log and engine wired together
pub struct Harness {
    pub ledger: InMemoryLedger,
    pub queue: InMemoryQueue,
    pub logs: TransactionLogService,
    pub handler: ProcessTransactionHandler,
    pub publisher: TransactionPublisher,
}

impl Harness {
    pub async fn new(minimum_reserve: Decimal) -> Self {
        Self::with_ledger(InMemoryLedger::new(), minimum_reserve).await
    }

    pub async fn with_lock_timeout(minimum_reserve: Decimal, lock_timeout: Duration) -> Self {
        Self::with_ledger(InMemoryLedger::with_lock_timeout(lock_timeout), minimum_reserve).await
    }

    async fn with_ledger(ledger: InMemoryLedger, minimum_reserve: Decimal) -> Self {
        let queue = InMemoryQueue::new();
        queue
            .declare_queue(QUEUE)
            .await
            .expect("Failed to declare queue");

        let logs = TransactionLogService::new(Arc::new(InMemoryAuditStore::new()));
        let handler =
            ProcessTransactionHandler::new(Arc::new(ledger.clone()), logs.clone(), minimum_reserve);
        let publisher = TransactionPublisher::new(Arc::new(queue.clone()), QUEUE);

        Self {
            ledger,
            queue,
            logs,
            handler,
            publisher,
        }
    }

    /// Seed an ACTIVE USD checking account
    pub fn account(&self, account_number: &str, balance: Decimal) -> Account {
        self.ledger.insert(Account::new(
            0,
            account_number,
            balance,
            "USD",
            AccountType::Checking,
        ))
    }

    pub fn submitter(&self) -> SubmitTransactionHandler {
        SubmitTransactionHandler::new(
            Arc::new(self.ledger.clone()),
            self.logs.clone(),
            self.publisher.clone(),
        )
    }

    pub fn consumer(&self, config: ConsumerConfig) -> TransactionConsumer {
        TransactionConsumer::new(
            Arc::new(self.queue.clone()),
            self.handler.clone(),
            self.logs.clone(),
            config,
        )
    }

    pub fn default_consumer(&self) -> TransactionConsumer {
        self.consumer(ConsumerConfig::new(QUEUE, "test-consumer"))
    }

    pub fn balance(&self, account_number: &str) -> Decimal {
        self.ledger
            .balance_of(account_number)
            .expect("account should exist")
    }

    pub async fn status(&self, transaction_id: &str) -> TransactionStatus {
        self.logs
            .get_by_transaction_id(transaction_id)
            .await
            .expect("transaction log should exist")
            .status
    }

    /// Poll until the record reaches `expected` or two seconds pass
    pub async fn wait_for_status(&self, transaction_id: &str, expected: TransactionStatus) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if let Ok(log) = self.logs.get_by_transaction_id(transaction_id).await {
                if log.status == expected {
                    return;
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "transaction {} never reached {}",
                transaction_id,
                expected
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Setup test database - truncate tables
pub async fn setup_test_db() -> PgPool {
    setup_test_db_with_pool_size(10).await
}

pub async fn setup_test_db_with_pool_size(max_connections: u32) -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    sqlx::query("TRUNCATE TABLE queue_messages, queues, transaction_logs, accounts RESTART IDENTITY CASCADE")
        .execute(&pool)
        .await
        .expect("Failed to clean up DB");

    pool
}
