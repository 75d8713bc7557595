//! In-memory queue for tests and local development.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{QueueEnvelope, QueueSender, TransportError};

/// A [`QueueSender`] that records envelopes per queue name.
#[derive(Debug, Default, Clone)]
pub struct MemoryQueue {
    queues: Arc<DashMap<String, Vec<QueueEnvelope>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Envelopes accepted on the named queue, in order.
    pub fn sent(&self, queue_name: &str) -> Vec<QueueEnvelope> {
        self.queues
            .get(queue_name)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    /// Removes and returns the envelopes accepted on the named queue.
    pub fn take_sent(&self, queue_name: &str) -> Vec<QueueEnvelope> {
        self.queues
            .remove(queue_name)
            .map(|(_, envelopes)| envelopes)
            .unwrap_or_default()
    }

    /// Total number of envelopes across all queues.
    pub fn total(&self) -> usize {
        self.queues.iter().map(|entry| entry.len()).sum()
    }
}

#[async_trait]
impl QueueSender for MemoryQueue {
    async fn enqueue(&self, envelope: QueueEnvelope) -> Result<(), TransportError> {
        self.queues
            .entry(envelope.queue_name.clone())
            .or_default()
            .push(envelope);
        Ok(())
    }
}
