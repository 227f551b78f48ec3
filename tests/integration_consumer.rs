//! Integration tests for the queue consumer over in-memory stores

use rust_decimal_macros::dec;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use queue_ledger::domain::{TransactionLog, TransactionMessage, TransactionStatus, TransactionType};
use queue_ledger::handlers::SubmitTransactionCommand;
use queue_ledger::ledger::{LedgerStore, LedgerTransaction};
use queue_ledger::messaging::{ConsumerConfig, DeliveryOutcome, OutboundMessage, QueueTransport};

mod common;

use common::{Harness, QUEUE};

fn deposit(id: &str, amount: rust_decimal::Decimal) -> TransactionMessage {
    TransactionMessage::new(id, TransactionType::Deposit, "CHE1", amount, "USD")
}

#[tokio::test]
async fn test_submit_then_consume_end_to_end() {
    let h = Harness::new(dec!(100)).await;
    h.account("CHE1", dec!(1000));

    let submitted = h
        .submitter()
        .execute(
            SubmitTransactionCommand::new("CHE1".into(), "500".into(), "DEPOSIT".into())
                .with_transaction_id("tx-1".into()),
        )
        .await
        .unwrap();
    assert_eq!(submitted.status, TransactionStatus::InProgress);

    let shutdown = CancellationToken::new();
    let worker = h.default_consumer().start(shutdown.clone());

    h.wait_for_status("tx-1", TransactionStatus::Completed).await;
    assert_eq!(h.balance("CHE1"), dec!(1500));

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), worker)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(h.queue.ready_count(QUEUE), 0);
    assert_eq!(h.queue.unacked_count(QUEUE), 0);
}

#[tokio::test]
async fn test_undecodable_message_is_discarded_and_loop_continues() {
    let h = Harness::new(dec!(100)).await;
    h.account("CHE1", dec!(1000));

    h.queue
        .publish(QUEUE, OutboundMessage::json("garbage", b"{not json".to_vec()))
        .await
        .unwrap();
    h.publisher.publish(&deposit("tx-1", dec!(10))).await.unwrap();

    let shutdown = CancellationToken::new();
    let worker = h.default_consumer().start(shutdown.clone());

    h.wait_for_status("tx-1", TransactionStatus::Completed).await;
    assert_eq!(h.balance("CHE1"), dec!(1010));
    assert_eq!(h.queue.discarded_count(QUEUE), 1);
    assert_eq!(h.queue.ready_count(QUEUE), 0);

    shutdown.cancel();
    worker.await.unwrap();
}

#[tokio::test]
async fn test_settlement_per_outcome() {
    let h = Harness::new(dec!(100)).await;
    h.account("CHE1", dec!(1000));
    let consumer = h.default_consumer();

    // Processed
    h.publisher.publish(&deposit("tx-ok", dec!(10))).await.unwrap();
    let delivery = h.queue.receive(QUEUE, "t").await.unwrap();
    assert_eq!(consumer.handle_delivery(&delivery).await, DeliveryOutcome::Acked);

    // Business rule failure
    let overdraw = TransactionMessage::new("tx-over", TransactionType::Withdrawal, "CHE1", dec!(5000), "USD");
    h.publisher.publish(&overdraw).await.unwrap();
    let delivery = h.queue.receive(QUEUE, "t").await.unwrap();
    assert_eq!(consumer.handle_delivery(&delivery).await, DeliveryOutcome::Rejected);
    assert_eq!(h.status("tx-over").await, TransactionStatus::Failed);

    // Undecodable
    h.queue
        .publish(QUEUE, OutboundMessage::json("bad", b"[]".to_vec()))
        .await
        .unwrap();
    let delivery = h.queue.receive(QUEUE, "t").await.unwrap();
    assert_eq!(consumer.handle_delivery(&delivery).await, DeliveryOutcome::Discarded);

    assert_eq!(h.queue.ready_count(QUEUE), 0);
    assert_eq!(h.queue.unacked_count(QUEUE), 0);
    assert_eq!(h.queue.discarded_count(QUEUE), 2);
    assert_eq!(h.balance("CHE1"), dec!(1010));
}

#[tokio::test]
async fn test_lock_timeout_requeues_then_succeeds() {
    let h = Harness::with_lock_timeout(dec!(100), Duration::from_millis(50)).await;
    h.account("CHE1", dec!(1000));
    let consumer = h.default_consumer();

    h.publisher.publish(&deposit("tx-1", dec!(10))).await.unwrap();

    let mut holder = h.ledger.begin().await.unwrap();
    holder.lock_account("CHE1").await.unwrap();

    let delivery = h.queue.receive(QUEUE, "t").await.unwrap();
    assert_eq!(consumer.handle_delivery(&delivery).await, DeliveryOutcome::Requeued);
    assert_eq!(h.queue.ready_count(QUEUE), 1);

    holder.rollback().await.unwrap();

    let redelivery = h.queue.receive(QUEUE, "t").await.unwrap();
    assert!(redelivery.redelivered);
    assert_eq!(consumer.handle_delivery(&redelivery).await, DeliveryOutcome::Acked);
    assert_eq!(h.balance("CHE1"), dec!(1010));
    assert_eq!(h.status("tx-1").await, TransactionStatus::Completed);
}

#[tokio::test]
async fn test_redelivery_limit_marks_failed() {
    let h = Harness::with_lock_timeout(dec!(100), Duration::from_millis(20)).await;
    h.account("CHE1", dec!(1000));
    h.logs
        .create(
            &TransactionLog::new("tx-1", 1, dec!(10), "USD", TransactionType::Deposit)
                .with_status(TransactionStatus::InProgress),
        )
        .await
        .unwrap();
    let consumer = h.consumer(ConsumerConfig::new(QUEUE, "bounded").with_max_redeliveries(2));

    h.publisher.publish(&deposit("tx-1", dec!(10))).await.unwrap();

    let mut holder = h.ledger.begin().await.unwrap();
    holder.lock_account("CHE1").await.unwrap();

    let first = h.queue.receive(QUEUE, "t").await.unwrap();
    assert_eq!(consumer.handle_delivery(&first).await, DeliveryOutcome::Requeued);

    let second = h.queue.receive(QUEUE, "t").await.unwrap();
    assert_eq!(second.delivery_count, 2);
    assert_eq!(consumer.handle_delivery(&second).await, DeliveryOutcome::DeadLettered);

    holder.rollback().await.unwrap();

    let log = h.logs.get_by_transaction_id("tx-1").await.unwrap();
    assert_eq!(log.status, TransactionStatus::Failed);
    assert_eq!(log.retry_count, 2);
    assert_eq!(h.queue.ready_count(QUEUE), 0);
    assert_eq!(h.balance("CHE1"), dec!(1000));
}

#[tokio::test]
async fn test_several_consumers_share_the_queue() {
    let h = Harness::new(dec!(100)).await;
    h.account("CHE1", dec!(1000));

    for i in 0..30 {
        h.publisher
            .publish(&deposit(&format!("tx-{}", i), dec!(1)))
            .await
            .unwrap();
    }

    let shutdown = CancellationToken::new();
    let workers: Vec<_> = (0..3)
        .map(|i| {
            h.consumer(ConsumerConfig::new(QUEUE, format!("worker-{}", i)))
                .start(shutdown.clone())
        })
        .collect();

    for i in 0..30 {
        h.wait_for_status(&format!("tx-{}", i), TransactionStatus::Completed)
            .await;
    }
    assert_eq!(h.balance("CHE1"), dec!(1030));

    shutdown.cancel();
    for worker in workers {
        worker.await.unwrap();
    }
}

#[tokio::test]
async fn test_idle_consumer_stops_on_shutdown() {
    let h = Harness::new(dec!(100)).await;
    let shutdown = CancellationToken::new();
    let worker = h.default_consumer().start(shutdown.clone());

    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown.cancel();

    tokio::time::timeout(Duration::from_secs(1), worker)
        .await
        .unwrap()
        .unwrap();
}
