use engine_gateway::messaging::{
    ImageFramePayload, LogEntryPayload, LogLevel, MessagePayload, MetricPayload,
};
use proptest::prelude::*;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Worker ids drawn from a small fixed pool so keyed payloads collide
pub fn worker_pool() -> Vec<Uuid> {
    (1..=4u128).map(Uuid::from_u128).collect()
}

pub fn log_level_strategy() -> impl Strategy<Value = LogLevel> {
    prop_oneof![
        Just(LogLevel::Debug),
        Just(LogLevel::Info),
        Just(LogLevel::Warning),
        Just(LogLevel::Error),
    ]
}

/// Metrics, log lines and image frames; the kinds a running engine produces continuously
pub fn payload_strategy() -> impl Strategy<Value = MessagePayload> {
    let workers = worker_pool();
    let image_workers = workers.clone();
    prop_oneof![
        (0.0f64..100.0).prop_map(|value| {
            let mut metrics = BTreeMap::new();
            metrics.insert("cpu".to_string(), value);
            MessagePayload::Metric(MetricPayload {
                worker_id: None,
                metrics,
            })
        }),
        (log_level_strategy(), "[a-z ]{1,24}", proptest::option::of(0..workers.len())).prop_map(
            move |(level, message, worker)| {
                MessagePayload::LogEntry(LogEntryPayload {
                    worker_id: worker.map(|i| workers[i]),
                    level,
                    message,
                    logged_at: chrono::Utc::now(),
                })
            }
        ),
        (0..image_workers.len(), proptest::collection::vec(any::<u8>(), 1..16)).prop_map(
            move |(i, data)| {
                MessagePayload::ImageFrame(ImageFramePayload {
                    worker_id: image_workers[i],
                    data,
                })
            }
        ),
    ]
}
