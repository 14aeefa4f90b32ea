//! In-process broker used by tests and local runs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::broker::Publisher;
use crate::error::{AppError, Disposition, Result};
use crate::pipeline::worker::{self, MessageHandler};

#[derive(Debug, Default)]
struct Inner {
    queues: HashMap<String, VecDeque<Vec<u8>>>,
    reject_publishes: bool,
}

/// FIFO queues keyed by name.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every publish fail as if the broker refused it.
    pub fn set_reject_publishes(&self, reject: bool) {
        self.lock().reject_publishes = reject;
    }

    /// Pending messages on `queue`, oldest first, without consuming them.
    pub fn peek(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock()
            .queues
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Pending messages on `queue` as text.
    pub fn peek_text(&self, queue: &str) -> Vec<String> {
        self.peek(queue)
            .into_iter()
            .map(|m| String::from_utf8_lossy(&m).into_owned())
            .collect()
    }

    pub fn len(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    /// Remove and return every pending message on `queue`.
    pub fn drain(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock()
            .queues
            .get_mut(queue)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }

    /// Hand every message currently on `queue` to `handler` once.
    ///
    /// Requeued messages go back to the tail and are not redelivered in the
    /// same call.
    pub async fn deliver_all(&self, queue: &str, handler: &dyn MessageHandler) -> Vec<Disposition> {
        let pending = self.drain(queue);
        let mut outcomes = Vec::with_capacity(pending.len());
        for payload in pending {
            let disposition = worker::process(handler, &payload).await;
            if disposition == Disposition::Requeue {
                self.lock()
                    .queues
                    .entry(queue.to_string())
                    .or_default()
                    .push_back(payload);
            }
            outcomes.push(disposition);
        }
        outcomes
    }
}

#[async_trait]
impl Publisher for MemoryBroker {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()> {
        let mut inner = self.lock();
        if inner.reject_publishes {
            return Err(AppError::PublishRejected {
                queue: queue.to_string(),
            });
        }
        inner
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(payload.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl MessageHandler for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn handle(&self, payload: &[u8]) -> Result<()> {
            match payload {
                b"retry" => Err(AppError::Database(sqlx::Error::PoolTimedOut)),
                _ => Ok(()),
            }
        }
    }

    #[tokio::test]
    async fn test_fifo_and_requeue() {
        let broker = MemoryBroker::new();
        broker.publish("q", b"one").await.unwrap();
        broker.publish("q", b"retry").await.unwrap();
        assert_eq!(broker.peek_text("q"), vec!["one", "retry"]);

        let outcomes = broker.deliver_all("q", &Echo).await;
        assert_eq!(outcomes, vec![Disposition::Ack, Disposition::Requeue]);
        assert_eq!(broker.peek_text("q"), vec!["retry"]);
    }

    #[tokio::test]
    async fn test_rejected_publish() {
        let broker = MemoryBroker::new();
        broker.set_reject_publishes(true);
        assert!(broker.publish("q", b"x").await.is_err());
        assert_eq!(broker.len("q"), 0);
    }
}
