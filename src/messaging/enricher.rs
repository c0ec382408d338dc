//! # Message Enricher
//!
//! Stamps payloads with engine identity, a sequence number and the enrichment time.
//! Two counter scopes exist: the global one owned by the [`Enricher`] (shared by every
//! producer of one engine) and the per-connection ones owned by each hub supervisor.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use super::message::{Envelope, MessagePayload};
use crate::constants::SEQUENCE_MODULUS;

/// Monotonic counter that wraps modulo 2^53 and never yields 0
#[derive(Debug)]
pub struct SequenceCounter {
    next: AtomicU64,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Counter whose next value is `start` (values outside `1..2^53` restart at 1)
    pub fn starting_at(start: u64) -> Self {
        let start = if (1..SEQUENCE_MODULUS).contains(&start) {
            start
        } else {
            1
        };
        Self {
            next: AtomicU64::new(start),
        }
    }

    pub fn next_value(&self) -> u64 {
        let mut current = self.next.load(Ordering::Relaxed);
        loop {
            let following = if current + 1 >= SEQUENCE_MODULUS {
                1
            } else {
                current + 1
            };
            match self.next.compare_exchange_weak(
                current,
                following,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return current,
                Err(actual) => current = actual,
            }
        }
    }

    /// Value the next call to [`next_value`](Self::next_value) will return
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Acquire)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Global-scope enricher: the only producer of [`Envelope`]s
#[derive(Debug, Clone)]
pub struct Enricher {
    engine_id: Uuid,
    counter: Arc<SequenceCounter>,
}

impl Enricher {
    pub fn new(engine_id: Uuid) -> Self {
        Self::with_counter(engine_id, Arc::new(SequenceCounter::new()))
    }

    pub fn with_counter(engine_id: Uuid, counter: Arc<SequenceCounter>) -> Self {
        Self { engine_id, counter }
    }

    pub fn engine_id(&self) -> Uuid {
        self.engine_id
    }

    pub fn enrich(&self, payload: MessagePayload) -> Envelope {
        Envelope::new(
            self.engine_id,
            self.counter.next_value(),
            Utc::now(),
            payload,
        )
    }
}
