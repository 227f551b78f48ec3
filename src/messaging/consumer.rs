//! Transaction consumer
//!
//! Pulls deliveries off the transaction queue and hands them to the
//! processing engine. Every delivery is settled exactly once:
//!
//! - processed (ledger committed): ack
//! - undecodable payload: reject without requeue
//! - terminal failure: reject without requeue (engine marked it FAILED)
//! - retryable failure: reject with requeue, unless the redelivery bound
//!   is reached, in which case the record is marked FAILED and dropped

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::{TransactionMessage, TransactionStatus};
use crate::error::ProcessError;
use crate::handlers::ProcessTransactionHandler;
use crate::transaction_log::TransactionLogService;

use super::{Delivery, QueueTransport};

/// Delay before receiving again after a transport error
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub queue_name: String,
    pub consumer_tag: String,
    /// Deliveries allowed per message before a retryable failure becomes
    /// final. `None` requeues indefinitely.
    pub max_redeliveries: Option<u32>,
}

impl ConsumerConfig {
    pub fn new(queue_name: impl Into<String>, consumer_tag: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            consumer_tag: consumer_tag.into(),
            max_redeliveries: None,
        }
    }

    pub fn with_max_redeliveries(mut self, max_redeliveries: u32) -> Self {
        self.max_redeliveries = Some(max_redeliveries);
        self
    }
}

/// How a delivery was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Acked,
    /// Payload could not be decoded
    Discarded,
    /// Terminal processing failure
    Rejected,
    Requeued,
    /// Retryable failure that exhausted the redelivery bound
    DeadLettered,
}

#[derive(Clone)]
pub struct TransactionConsumer {
    transport: Arc<dyn QueueTransport>,
    handler: ProcessTransactionHandler,
    logs: TransactionLogService,
    config: ConsumerConfig,
}

impl TransactionConsumer {
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        handler: ProcessTransactionHandler,
        logs: TransactionLogService,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            transport,
            handler,
            logs,
            config,
        }
    }

    /// Spawn the consumption loop on the runtime
    pub fn start(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// Consume until `shutdown` is cancelled. A delivery already being
    /// handled is settled before the loop exits.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            queue = %self.config.queue_name,
            consumer_tag = %self.config.consumer_tag,
            "Consumer started"
        );

        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.transport.receive(&self.config.queue_name, &self.config.consumer_tag) => received,
            };

            match received {
                Ok(delivery) => {
                    self.handle_delivery(&delivery).await;
                }
                Err(e) => {
                    tracing::error!(
                        queue = %self.config.queue_name,
                        error = %e,
                        "Failed to receive from queue"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        tracing::info!(consumer_tag = %self.config.consumer_tag, "Consumer stopped");
    }

    /// Decode, process and settle a single delivery
    pub async fn handle_delivery(&self, delivery: &Delivery) -> DeliveryOutcome {
        let message: TransactionMessage = match serde_json::from_slice(&delivery.payload) {
            Ok(message) => message,
            Err(e) => {
                let err = ProcessError::Decode(e.to_string());
                tracing::warn!(
                    delivery_tag = delivery.delivery_tag,
                    message_id = ?delivery.message_id,
                    kind = err.kind().as_str(),
                    error = %err,
                    "Discarding undecodable message"
                );
                self.settle(delivery, Some(false)).await;
                return DeliveryOutcome::Discarded;
            }
        };

        match self.handler.process(&message).await {
            Ok(_) => {
                self.settle(delivery, None).await;
                DeliveryOutcome::Acked
            }
            Err(err) if !err.is_retryable() => {
                self.settle(delivery, Some(false)).await;
                DeliveryOutcome::Rejected
            }
            Err(err) => {
                if self.redeliveries_exhausted(delivery) {
                    tracing::error!(
                        transaction_id = %message.id,
                        delivery_count = delivery.delivery_count,
                        error = %err,
                        "Redelivery limit reached, giving up"
                    );
                    if let Err(audit_err) = self
                        .logs
                        .update_status(&message.id, TransactionStatus::Failed)
                        .await
                    {
                        tracing::warn!(
                            transaction_id = %message.id,
                            error = %audit_err,
                            "Failed to mark abandoned transaction FAILED"
                        );
                    }
                    self.settle(delivery, Some(false)).await;
                    DeliveryOutcome::DeadLettered
                } else {
                    self.settle(delivery, Some(true)).await;
                    DeliveryOutcome::Requeued
                }
            }
        }
    }

    fn redeliveries_exhausted(&self, delivery: &Delivery) -> bool {
        match self.config.max_redeliveries {
            Some(max) => i64::from(delivery.delivery_count) >= i64::from(max),
            None => false,
        }
    }

    /// `None` acks; `Some(requeue)` rejects
    async fn settle(&self, delivery: &Delivery, reject: Option<bool>) {
        let result = match reject {
            None => self.transport.ack(delivery).await,
            Some(requeue) => self.transport.reject(delivery, requeue).await,
        };

        if let Err(e) = result {
            // The broker redelivers anything left unsettled
            tracing::error!(
                delivery_tag = delivery.delivery_tag,
                error = %e,
                "Failed to settle delivery"
            );
        }
    }
}
