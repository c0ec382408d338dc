//! Periodic engine metrics published to the global queue.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::hub::HubManager;
use crate::messaging::{Envelope, MessagePayload, MessagePublisher, MetricPayload};
use crate::worker::WorkerManager;

pub const METRIC_NAMES: [&str; 5] = [
    "workers_total",
    "workers_running",
    "global_queue_depth",
    "uptime_seconds",
    "hubs_connected",
];

pub struct MetricsCollector {
    publisher: MessagePublisher,
    workers: Arc<WorkerManager>,
    hubs: Arc<HubManager>,
    started: Instant,
    interval: Duration,
}

impl MetricsCollector {
    pub fn new(
        publisher: MessagePublisher,
        workers: Arc<WorkerManager>,
        hubs: Arc<HubManager>,
        interval: Duration,
    ) -> Self {
        Self {
            publisher,
            workers,
            hubs,
            started: Instant::now(),
            interval,
        }
    }

    pub fn sample(&self) -> BTreeMap<String, f64> {
        let values = [
            self.workers.len() as f64,
            self.workers.running_count() as f64,
            self.publisher.queue().len() as f64,
            self.started.elapsed().as_secs_f64().floor(),
            self.hubs.connected_count() as f64,
        ];
        METRIC_NAMES
            .iter()
            .zip(values)
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }

    /// Publish one engine-level metric message
    pub fn collect(&self) -> Arc<Envelope> {
        self.publisher.publish(MessagePayload::Metric(MetricPayload {
            worker_id: None,
            metrics: self.sample(),
        }))
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(interval_ms = self.interval.as_millis() as u64, "📊 Metrics collector started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let envelope = self.collect();
                    debug!(sequence = envelope.sequence_number(), "Engine metrics published");
                }
            }
        }
        debug!("Metrics collector stopped");
    }
}

impl fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("interval", &self.interval)
            .finish()
    }
}
