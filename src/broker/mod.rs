//! Message broker access.
//!
//! Stages publish through the [`Publisher`] trait so the core logic never
//! depends on a concrete client. [`AmqpBroker`] talks to RabbitMQ;
//! [`MemoryBroker`] keeps queues in process for tests.

pub mod amqp;
pub mod memory;

use async_trait::async_trait;

use crate::error::Result;

pub use amqp::AmqpBroker;
pub use memory::MemoryBroker;

/// Send a persistent message to a named queue.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<()>;
}
