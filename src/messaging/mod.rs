//! Messaging
//!
//! Queue transport abstraction plus the transaction publisher and consumer.
//!
//! The transport contract is that of a durable broker queue: at-least-once
//! delivery, manual acknowledgement, and redelivery of anything not acked
//! within the visibility timeout.

mod consumer;
mod memory;
mod postgres;
mod publisher;

use async_trait::async_trait;
use std::time::Duration;

pub use consumer::{ConsumerConfig, DeliveryOutcome, TransactionConsumer};
pub use memory::InMemoryQueue;
pub use postgres::PgQueue;
pub use publisher::{PublishError, TransactionPublisher};

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A message to be enqueued
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub message_id: Option<String>,
    pub content_type: String,
    pub payload: Vec<u8>,
    /// Survive broker restarts
    pub persistent: bool,
}

impl OutboundMessage {
    pub fn json(message_id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            message_id: Some(message_id.into()),
            content_type: JSON_CONTENT_TYPE.to_string(),
            payload,
            persistent: true,
        }
    }
}

/// A message handed to a consumer, pending ack or reject
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub delivery_tag: i64,
    pub queue: String,
    pub message_id: Option<String>,
    pub payload: Vec<u8>,
    /// Set when this message has been delivered before
    pub redelivered: bool,
    /// Number of times this message has been handed out, this one included
    pub delivery_count: i32,
}

/// Durable queue broker
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Declare a durable queue; no-op if it already exists
    async fn declare_queue(&self, queue: &str) -> Result<(), TransportError>;

    async fn publish(&self, queue: &str, message: OutboundMessage) -> Result<(), TransportError>;

    /// Wait for the next delivery on `queue`
    async fn receive(&self, queue: &str, consumer_tag: &str) -> Result<Delivery, TransportError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), TransportError>;

    /// Reject a delivery, either returning it to the queue or dropping it
    async fn reject(&self, delivery: &Delivery, requeue: bool) -> Result<(), TransportError>;

    /// Return deliveries left unacknowledged longer than `older_than` to the
    /// queue. Returns how many were requeued.
    async fn requeue_expired(&self, queue: &str, older_than: Duration) -> Result<u64, TransportError>;
}

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Queue not declared: {0}")]
    QueueNotDeclared(String),

    #[error("Unknown or expired delivery: {0}")]
    UnknownDelivery(i64),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
