//! PostgreSQL-backed durable queue
//!
//! Messages live in `queue_messages`. A delivery is a row claimed with
//! `FOR UPDATE SKIP LOCKED` and flipped to `unacked`; acking deletes it.
//! A row is identified to its holder by `(id, delivery_count)`, so a consumer
//! whose delivery expired and was handed to someone else cannot settle it.

use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;

use super::{Delivery, OutboundMessage, QueueTransport, TransportError};

/// Durable queue over a PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgQueue {
    pool: PgPool,
    poll_interval: Duration,
}

impl PgQueue {
    pub fn new(pool: PgPool, poll_interval: Duration) -> Self {
        Self {
            pool,
            poll_interval,
        }
    }

    async fn try_claim(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<Option<Delivery>, TransportError> {
        let row: Option<(i64, Option<String>, Vec<u8>, i32)> = sqlx::query_as(
            r#"
            UPDATE queue_messages
            SET status = 'unacked',
                consumer_tag = $2,
                delivery_count = delivery_count + 1,
                delivered_at = NOW()
            WHERE id = (
                SELECT id FROM queue_messages
                WHERE queue_name = $1 AND status = 'ready'
                ORDER BY id
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, message_id, payload, delivery_count
            "#,
        )
        .bind(queue)
        .bind(consumer_tag)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, message_id, payload, delivery_count)| Delivery {
            delivery_tag: id,
            queue: queue.to_string(),
            message_id,
            payload,
            redelivered: delivery_count > 1,
            delivery_count,
        }))
    }

    async fn queue_exists(&self, queue: &str) -> Result<bool, TransportError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM queues WHERE name = $1)")
                .bind(queue)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}

#[async_trait]
impl QueueTransport for PgQueue {
    async fn declare_queue(&self, queue: &str) -> Result<(), TransportError> {
        sqlx::query("INSERT INTO queues (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
            .bind(queue)
            .execute(&self.pool)
            .await?;

        tracing::debug!(queue = %queue, "Queue declared");
        Ok(())
    }

    async fn publish(&self, queue: &str, message: OutboundMessage) -> Result<(), TransportError> {
        let result = sqlx::query(
            r#"
            INSERT INTO queue_messages (queue_name, message_id, content_type, payload, persistent)
            SELECT name, $2, $3, $4, $5 FROM queues WHERE name = $1
            "#,
        )
        .bind(queue)
        .bind(&message.message_id)
        .bind(&message.content_type)
        .bind(&message.payload)
        .bind(message.persistent)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TransportError::QueueNotDeclared(queue.to_string()));
        }

        Ok(())
    }

    async fn receive(&self, queue: &str, consumer_tag: &str) -> Result<Delivery, TransportError> {
        if !self.queue_exists(queue).await? {
            return Err(TransportError::QueueNotDeclared(queue.to_string()));
        }

        loop {
            if let Some(delivery) = self.try_claim(queue, consumer_tag).await? {
                return Ok(delivery);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), TransportError> {
        let result = sqlx::query(
            r#"
            DELETE FROM queue_messages
            WHERE id = $1 AND delivery_count = $2 AND status = 'unacked'
            "#,
        )
        .bind(delivery.delivery_tag)
        .bind(delivery.delivery_count)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TransportError::UnknownDelivery(delivery.delivery_tag));
        }

        Ok(())
    }

    async fn reject(&self, delivery: &Delivery, requeue: bool) -> Result<(), TransportError> {
        let sql = if requeue {
            r#"
            UPDATE queue_messages
            SET status = 'ready', consumer_tag = NULL, delivered_at = NULL
            WHERE id = $1 AND delivery_count = $2 AND status = 'unacked'
            "#
        } else {
            r#"
            DELETE FROM queue_messages
            WHERE id = $1 AND delivery_count = $2 AND status = 'unacked'
            "#
        };

        let result = sqlx::query(sql)
            .bind(delivery.delivery_tag)
            .bind(delivery.delivery_count)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(TransportError::UnknownDelivery(delivery.delivery_tag));
        }

        Ok(())
    }

    async fn requeue_expired(&self, queue: &str, older_than: Duration) -> Result<u64, TransportError> {
        let seconds = i64::try_from(older_than.as_secs()).unwrap_or(i64::MAX);

        let result = sqlx::query(
            r#"
            UPDATE queue_messages
            SET status = 'ready', consumer_tag = NULL, delivered_at = NULL
            WHERE queue_name = $1
              AND status = 'unacked'
              AND delivered_at < NOW() - ($2::bigint * INTERVAL '1 second')
            "#,
        )
        .bind(queue)
        .bind(seconds)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
