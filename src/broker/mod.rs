//! The message broker seam between components.
//!
//! Components never share memory or query each other's databases; every
//! interaction goes through named queues with at-least-once delivery and
//! manual acknowledgement. The trait mirrors the basic-publish /
//! basic-get / basic-ack surface of an AMQP channel, and the in-process
//! implementation stands in for a real broker when the whole pipeline
//! runs embedded in one process.

pub mod memory;

use async_trait::async_trait;

use crate::error::AppResult;

pub use memory::MemoryBroker;

/// A single undelivered-until-acked message.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Declare a durable queue. Idempotent.
    async fn declare_queue(&self, queue: &str) -> AppResult<()>;

    /// Append a message to a queue.
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> AppResult<()>;

    /// Take at most one message off a queue. The message stays unacked
    /// until [`ack`](Self::ack) is called with its delivery tag; an
    /// unacked message may be redelivered.
    async fn get(&self, queue: &str) -> AppResult<Option<Delivery>>;

    /// Acknowledge a delivery, removing it from the queue for good.
    async fn ack(&self, queue: &str, delivery_tag: u64) -> AppResult<()>;
}
