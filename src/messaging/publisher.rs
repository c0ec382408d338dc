//! Global publishing point: enrich in the global scope, then enqueue on the global queue.

use std::sync::Arc;
use uuid::Uuid;

use super::enricher::Enricher;
use super::message::{Envelope, MessagePayload};
use super::multi_queue::MultiQueue;

#[derive(Debug, Clone)]
pub struct MessagePublisher {
    enricher: Enricher,
    queue: Arc<MultiQueue>,
}

impl MessagePublisher {
    pub fn new(enricher: Enricher, queue: Arc<MultiQueue>) -> Self {
        Self { enricher, queue }
    }

    pub fn engine_id(&self) -> Uuid {
        self.enricher.engine_id()
    }

    pub fn enricher(&self) -> &Enricher {
        &self.enricher
    }

    pub fn queue(&self) -> &Arc<MultiQueue> {
        &self.queue
    }

    /// Enrich and enqueue; image frames are kept one per worker
    pub fn publish(&self, payload: MessagePayload) -> Arc<Envelope> {
        let envelope = Arc::new(self.enricher.enrich(payload));
        self.queue.enqueue_envelope(envelope.clone());
        envelope
    }
}
