//! # MultiQueue
//!
//! Bounded, kind-partitioned and key-partitioned hand-off buffer between many producers and
//! one drain loop.
//!
//! - Each [`MessageKind`] has its own lock-free ring of capacity `N`. A full ring evicts its
//!   oldest entry, so producers never block and the newest `N` messages of a kind survive.
//! - Messages enqueued with a unique key live in a single-slot-per-key store; a new message
//!   under an existing key replaces the pending one.
//! - [`MultiQueue::dequeue`] round-robins over the kind rings and the keyed store, and
//!   suspends until data arrives or the cancellation token fires.

use crossbeam::queue::{ArrayQueue, SegQueue};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::message::{Envelope, MessageKind};

/// Counters describing queue pressure
#[derive(Debug, Default)]
pub struct MultiQueueStats {
    pub enqueued: AtomicU64,
    pub dequeued: AtomicU64,
    pub evicted: AtomicU64,
    pub replaced: AtomicU64,
}

/// Point-in-time copy of [`MultiQueueStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MultiQueueStatsSnapshot {
    pub enqueued: u64,
    pub dequeued: u64,
    pub evicted: u64,
    pub replaced: u64,
}

#[derive(Debug)]
pub struct MultiQueue {
    name: String,
    capacity: usize,
    lanes: Vec<ArrayQueue<Arc<Envelope>>>,
    unique: DashMap<String, Arc<Envelope>>,
    unique_order: SegQueue<String>,
    cursor: AtomicUsize,
    notify: Notify,
    stats: MultiQueueStats,
}

impl MultiQueue {
    /// Create a queue whose kind lanes hold `capacity` messages each (at least one)
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name: name.into(),
            capacity,
            lanes: MessageKind::ALL
                .iter()
                .map(|_| ArrayQueue::new(capacity))
                .collect(),
            unique: DashMap::new(),
            unique_order: SegQueue::new(),
            cursor: AtomicUsize::new(0),
            notify: Notify::new(),
            stats: MultiQueueStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue without blocking. With a key the message replaces any pending one under that key;
    /// without a key a full kind lane drops its oldest entry.
    pub fn enqueue(&self, message: Arc<Envelope>, unique_key: Option<String>) {
        match unique_key {
            Some(key) => {
                if self.unique.insert(key.clone(), message).is_some() {
                    self.stats.replaced.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.unique_order.push(key);
                }
            }
            None => {
                let kind = message.kind();
                if let Some(evicted) = self.lanes[kind.index()].force_push(message) {
                    self.stats.evicted.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        queue = %self.name,
                        kind = %kind,
                        evicted_sequence = evicted.sequence_number(),
                        capacity = self.capacity,
                        "Queue lane full, dropped oldest message"
                    );
                }
            }
        }
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_one();
    }

    /// Enqueue using the envelope's own unique key, if it has one
    pub fn enqueue_envelope(&self, message: Arc<Envelope>) {
        let key = message.unique_key();
        self.enqueue(message, key);
    }

    /// Take one message if any is pending
    pub fn try_dequeue(&self) -> Option<Arc<Envelope>> {
        let lane_count = self.lanes.len() + 1;
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % lane_count;

        for offset in 0..lane_count {
            let lane = (start + offset) % lane_count;
            let next = if lane == self.lanes.len() {
                self.pop_unique()
            } else {
                self.lanes[lane].pop()
            };
            if let Some(message) = next {
                self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
                return Some(message);
            }
        }
        None
    }

    /// Wait for the next message; `None` once `cancel` fires
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Option<Arc<Envelope>> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.try_dequeue() {
                return Some(message);
            }
            if cancel.is_cancelled() {
                return None;
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = &mut notified => {}
            }
        }
    }

    fn pop_unique(&self) -> Option<Arc<Envelope>> {
        while let Some(key) = self.unique_order.pop() {
            if let Some((_, message)) = self.unique.remove(&key) {
                return Some(message);
            }
        }
        None
    }

    pub fn size_for_kind(&self, kind: MessageKind) -> usize {
        self.lanes[kind.index()].len()
    }

    pub fn size_for_key(&self, key: &str) -> usize {
        usize::from(self.unique.contains_key(key))
    }

    /// Total pending messages across lanes and keys
    pub fn len(&self) -> usize {
        self.lanes.iter().map(ArrayQueue::len).sum::<usize>() + self.unique.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> MultiQueueStatsSnapshot {
        MultiQueueStatsSnapshot {
            enqueued: self.stats.enqueued.load(Ordering::Relaxed),
            dequeued: self.stats.dequeued.load(Ordering::Relaxed),
            evicted: self.stats.evicted.load(Ordering::Relaxed),
            replaced: self.stats.replaced.load(Ordering::Relaxed),
        }
    }
}
