//! In-process broker with at-least-once semantics.
//!
//! Substitutes for an external AMQP broker when all components run
//! embedded in one process. Each queue keeps a ready list and an
//! unacked map; `get` moves a message from ready to unacked, `ack`
//! drops it, and `requeue_unacked` pushes everything unacked back to
//! the front of the ready list, which is exactly what a broker does
//! when a consumer dies before acking.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{AppResult, BrokerError};

use super::{Delivery, MessageBroker};

#[derive(Default)]
struct Queue {
    ready: VecDeque<Delivery>,
    unacked: HashMap<u64, Delivery>,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, Queue>,
    next_tag: u64,
}

/// Durable-enough named queues backed by process memory.
#[derive(Default)]
pub struct MemoryBroker {
    state: Mutex<BrokerState>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ready (not yet delivered or requeued) messages.
    pub fn ready_len(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.ready.len())
            .unwrap_or(0)
    }

    /// Push all unacked messages of a queue back to the front of the
    /// ready list, simulating a consumer crash before ack.
    pub fn requeue_unacked(&self, queue: &str) {
        let mut state = self.state.lock();
        if let Some(q) = state.queues.get_mut(queue) {
            let mut tags: Vec<u64> = q.unacked.keys().copied().collect();
            tags.sort_unstable();
            for tag in tags.into_iter().rev() {
                if let Some(delivery) = q.unacked.remove(&tag) {
                    q.ready.push_front(delivery);
                }
            }
        }
    }
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    async fn declare_queue(&self, queue: &str) -> AppResult<()> {
        self.state.lock().queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: Vec<u8>) -> AppResult<()> {
        let mut state = self.state.lock();
        state.next_tag += 1;
        let delivery = Delivery {
            delivery_tag: state.next_tag,
            payload,
        };
        state
            .queues
            .entry(queue.to_string())
            .or_default()
            .ready
            .push_back(delivery);
        Ok(())
    }

    async fn get(&self, queue: &str) -> AppResult<Option<Delivery>> {
        let mut state = self.state.lock();
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?;

        match q.ready.pop_front() {
            Some(delivery) => {
                q.unacked.insert(delivery.delivery_tag, delivery.clone());
                Ok(Some(delivery))
            }
            None => Ok(None),
        }
    }

    async fn ack(&self, queue: &str, delivery_tag: u64) -> AppResult<()> {
        let mut state = self.state.lock();
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::UnknownQueue(queue.to_string()))?;

        q.unacked
            .remove(&delivery_tag)
            .ok_or(BrokerError::UnknownDeliveryTag {
                queue: queue.to_string(),
                tag: delivery_tag,
            })?;
        Ok(())
    }
}
