//! # Outbound Messaging
//!
//! Envelope model, enrichment and the bounded multi-keyed queue that connects message
//! producers (worker controllers, telemetry) to the hub connection supervisors.

pub mod enricher;
pub mod message;
pub mod multi_queue;
pub mod publisher;

pub use enricher::{Enricher, SequenceCounter};
pub use message::{
    image_key, ConnectionEnvelope, DeadLetterPayload, Envelope, ImageFramePayload,
    LogEntryPayload, LogLevel, MessageKind, MessagePayload, MetricPayload, SystemInfoPayload,
    WorkerEventPayload,
};
pub use multi_queue::{MultiQueue, MultiQueueStatsSnapshot};
pub use publisher::MessagePublisher;
