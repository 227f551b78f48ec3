//! In-memory queue transport
//!
//! Same delivery semantics as the durable transport: messages stay
//! unacknowledged until acked or rejected, and `requeue_expired` plays the
//! broker's redelivery timeout.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

use super::{Delivery, OutboundMessage, QueueTransport, TransportError};

#[derive(Debug, Clone)]
struct Stored {
    message: OutboundMessage,
    delivery_count: i32,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Stored>,
    unacked: HashMap<i64, (Stored, Instant)>,
    discarded: usize,
    /// Wakes receivers blocked on this queue only
    notify: Arc<Notify>,
}

#[derive(Clone, Default)]
pub struct InMemoryQueue {
    queues: Arc<Mutex<HashMap<String, QueueState>>>,
    next_tag: Arc<AtomicI64>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages waiting for a consumer
    pub fn ready_count(&self, queue: &str) -> usize {
        self.with_queue(queue, |q| q.ready.len())
    }

    /// Messages delivered but not yet acked or rejected
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.with_queue(queue, |q| q.unacked.len())
    }

    /// Messages rejected without requeue
    pub fn discarded_count(&self, queue: &str) -> usize {
        self.with_queue(queue, |q| q.discarded)
    }

    fn with_queue<T: Default>(&self, queue: &str, f: impl FnOnce(&QueueState) -> T) -> T {
        let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.get(queue).map(f).unwrap_or_default()
    }

    fn try_take(&self, queue: &str) -> Result<Option<Delivery>, TransportError> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| TransportError::QueueNotDeclared(queue.to_string()))?;

        let Some(mut stored) = state.ready.pop_front() else {
            return Ok(None);
        };

        stored.delivery_count += 1;
        let delivery_tag = self.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
        let delivery = Delivery {
            delivery_tag,
            queue: queue.to_string(),
            message_id: stored.message.message_id.clone(),
            payload: stored.message.payload.clone(),
            redelivered: stored.delivery_count > 1,
            delivery_count: stored.delivery_count,
        };
        state.unacked.insert(delivery_tag, (stored, Instant::now()));

        Ok(Some(delivery))
    }

    fn settle(&self, delivery: &Delivery, requeue: Option<bool>) -> Result<(), TransportError> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let state = queues
            .get_mut(&delivery.queue)
            .ok_or_else(|| TransportError::QueueNotDeclared(delivery.queue.clone()))?;

        let (stored, _) = state
            .unacked
            .remove(&delivery.delivery_tag)
            .ok_or(TransportError::UnknownDelivery(delivery.delivery_tag))?;

        match requeue {
            None => {}
            Some(true) => {
                state.ready.push_back(stored);
                state.notify.notify_one();
            }
            Some(false) => state.discarded += 1,
        }

        Ok(())
    }
}

#[async_trait]
impl QueueTransport for InMemoryQueue {
    async fn declare_queue(&self, queue: &str) -> Result<(), TransportError> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn publish(&self, queue: &str, message: OutboundMessage) -> Result<(), TransportError> {
        {
            let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
            let state = queues
                .get_mut(queue)
                .ok_or_else(|| TransportError::QueueNotDeclared(queue.to_string()))?;
            state.ready.push_back(Stored {
                message,
                delivery_count: 0,
            });
            state.notify.notify_one();
        }
        Ok(())
    }

    async fn receive(&self, queue: &str, _consumer_tag: &str) -> Result<Delivery, TransportError> {
        let notify = {
            let queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
            queues
                .get(queue)
                .map(|state| state.notify.clone())
                .ok_or_else(|| TransportError::QueueNotDeclared(queue.to_string()))?
        };

        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            // Register before checking so a publish in between is not missed
            notified.as_mut().enable();

            if let Some(delivery) = self.try_take(queue)? {
                return Ok(delivery);
            }
            notified.await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), TransportError> {
        self.settle(delivery, None)
    }

    async fn reject(&self, delivery: &Delivery, requeue: bool) -> Result<(), TransportError> {
        self.settle(delivery, Some(requeue))
    }

    async fn requeue_expired(&self, queue: &str, older_than: Duration) -> Result<u64, TransportError> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let state = queues
            .get_mut(queue)
            .ok_or_else(|| TransportError::QueueNotDeclared(queue.to_string()))?;

        let mut expired: Vec<i64> = state
            .unacked
            .iter()
            .filter(|(_, (_, delivered_at))| delivered_at.elapsed() >= older_than)
            .map(|(tag, _)| *tag)
            .collect();
        expired.sort_unstable();

        for tag in &expired {
            if let Some((stored, _)) = state.unacked.remove(tag) {
                state.ready.push_back(stored);
                state.notify.notify_one();
            }
        }

        Ok(expired.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn queue_with(payloads: &[&str]) -> InMemoryQueue {
        let queue = InMemoryQueue::new();
        queue.declare_queue("q").await.unwrap();
        for (i, payload) in payloads.iter().enumerate() {
            queue
                .publish("q", OutboundMessage::json(format!("m{}", i), payload.as_bytes().to_vec()))
                .await
                .unwrap();
        }
        queue
    }

    #[tokio::test]
    async fn test_fifo_and_ack() {
        let queue = queue_with(&["a", "b"]).await;

        let first = queue.receive("q", "c").await.unwrap();
        assert_eq!(first.payload, b"a");
        assert!(!first.redelivered);
        assert_eq!(queue.unacked_count("q"), 1);

        queue.ack(&first).await.unwrap();
        assert_eq!(queue.unacked_count("q"), 0);
        assert_eq!(queue.ready_count("q"), 1);

        // Double ack is rejected
        assert!(matches!(
            queue.ack(&first).await,
            Err(TransportError::UnknownDelivery(_))
        ));
    }

    #[tokio::test]
    async fn test_reject_with_requeue_redelivers() {
        let queue = queue_with(&["a"]).await;

        let first = queue.receive("q", "c").await.unwrap();
        queue.reject(&first, true).await.unwrap();

        let second = queue.receive("q", "c").await.unwrap();
        assert_eq!(second.payload, b"a");
        assert!(second.redelivered);
        assert_eq!(second.delivery_count, 2);
        assert_ne!(first.delivery_tag, second.delivery_tag);
    }

    #[tokio::test]
    async fn test_reject_without_requeue_discards() {
        let queue = queue_with(&["a"]).await;

        let delivery = queue.receive("q", "c").await.unwrap();
        queue.reject(&delivery, false).await.unwrap();

        assert_eq!(queue.ready_count("q"), 0);
        assert_eq!(queue.unacked_count("q"), 0);
        assert_eq!(queue.discarded_count("q"), 1);
    }

    #[tokio::test]
    async fn test_expired_deliveries_come_back() {
        let queue = queue_with(&["a"]).await;

        let lost = queue.receive("q", "crashed").await.unwrap();
        assert_eq!(queue.requeue_expired("q", Duration::ZERO).await.unwrap(), 1);

        let again = queue.receive("q", "survivor").await.unwrap();
        assert_eq!(again.payload, lost.payload);
        assert!(again.redelivered);

        // The stale tag can no longer be acked
        assert!(queue.ack(&lost).await.is_err());
    }

    #[tokio::test]
    async fn test_receive_waits_for_publish() {
        let queue = queue_with(&[]).await;

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.receive("q", "c").await })
        };

        tokio::task::yield_now().await;
        queue
            .publish("q", OutboundMessage::json("late", b"late".to_vec()))
            .await
            .unwrap();

        let delivery = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(delivery.payload, b"late");
    }

    #[tokio::test]
    async fn test_publish_wakes_receiver_on_that_queue() {
        let queue = InMemoryQueue::new();
        queue.declare_queue("a").await.unwrap();
        queue.declare_queue("b").await.unwrap();

        let idle = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.receive("b", "idle").await })
        };
        tokio::task::yield_now().await;
        let waiting = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.receive("a", "busy").await })
        };
        tokio::task::yield_now().await;

        queue
            .publish("a", OutboundMessage::json("for-a", b"a".to_vec()))
            .await
            .unwrap();

        let delivery = tokio::time::timeout(Duration::from_millis(500), waiting)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(delivery.payload, b"a");
        assert_eq!(queue.ready_count("a"), 0);
        assert!(!idle.is_finished());
        idle.abort();
    }

    #[tokio::test]
    async fn test_undeclared_queue() {
        let queue = InMemoryQueue::new();
        assert!(matches!(
            queue.publish("nope", OutboundMessage::json("x", vec![])).await,
            Err(TransportError::QueueNotDeclared(_))
        ));
        assert!(matches!(
            queue.receive("nope", "c").await,
            Err(TransportError::QueueNotDeclared(_))
        ));
    }
}
