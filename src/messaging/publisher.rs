//! Transaction publisher
//!
//! Serializes a `TransactionMessage` to JSON and enqueues it as a persistent
//! message on the durable transaction queue.

use std::sync::Arc;

use crate::domain::TransactionMessage;

use super::{OutboundMessage, QueueTransport, TransportError};

/// Publisher errors
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Invalid message: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Clone)]
pub struct TransactionPublisher {
    transport: Arc<dyn QueueTransport>,
    queue_name: String,
}

impl TransactionPublisher {
    pub fn new(transport: Arc<dyn QueueTransport>, queue_name: impl Into<String>) -> Self {
        Self {
            transport,
            queue_name: queue_name.into(),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Declare the transaction queue; safe to call repeatedly
    pub async fn declare(&self) -> Result<(), PublishError> {
        self.transport.declare_queue(&self.queue_name).await?;
        Ok(())
    }

    /// Validate, serialize and enqueue a transaction message
    pub async fn publish(&self, message: &TransactionMessage) -> Result<(), PublishError> {
        message.validate().map_err(PublishError::Validation)?;

        let payload = serde_json::to_vec(message)?;
        self.transport
            .publish(&self.queue_name, OutboundMessage::json(message.id.clone(), payload))
            .await?;

        tracing::debug!(
            transaction_id = %message.id,
            queue = %self.queue_name,
            "Transaction message published"
        );

        Ok(())
    }
}
