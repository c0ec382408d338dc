//! # Message Model
//!
//! Every outbound message is an [`Envelope`]: source identity, a logical sequence number and
//! the wall-clock time of enrichment wrapped around a [`MessagePayload`]. Envelopes are only
//! produced by the [`Enricher`](super::enricher::Enricher) and expose no setters, so a
//! payload's kind and content cannot change after enqueue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::constants::IMAGE_KEY_PREFIX;
use crate::worker::state::{EventType, WorkerState};

/// Closed set of payload kinds carried by envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Metric,
    LogEntry,
    ImageFrame,
    WorkerEvent,
    SystemInfo,
    DeadLetter,
}

impl MessageKind {
    pub const ALL: [MessageKind; 6] = [
        MessageKind::Metric,
        MessageKind::LogEntry,
        MessageKind::ImageFrame,
        MessageKind::WorkerEvent,
        MessageKind::SystemInfo,
        MessageKind::DeadLetter,
    ];

    /// Dense index used to address per-kind queue lanes
    pub fn index(self) -> usize {
        match self {
            Self::Metric => 0,
            Self::LogEntry => 1,
            Self::ImageFrame => 2,
            Self::WorkerEvent => 3,
            Self::SystemInfo => 4,
            Self::DeadLetter => 5,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Metric => write!(f, "metric"),
            Self::LogEntry => write!(f, "log_entry"),
            Self::ImageFrame => write!(f, "image_frame"),
            Self::WorkerEvent => write!(f, "worker_event"),
            Self::SystemInfo => write!(f, "system_info"),
            Self::DeadLetter => write!(f, "dead_letter"),
        }
    }
}

/// Named numeric samples, engine-level or scoped to one worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPayload {
    pub worker_id: Option<Uuid>,
    pub metrics: BTreeMap<String, f64>,
}

/// Log severity carried by log entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntryPayload {
    /// `None` for engine-level log lines
    pub worker_id: Option<Uuid>,
    pub level: LogLevel,
    pub message: String,
    pub logged_at: DateTime<Utc>,
}

/// One encoded frame produced by a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageFramePayload {
    pub worker_id: Uuid,
    pub data: Vec<u8>,
}

/// Externally visible state of a worker at the time of the event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerEventPayload {
    pub worker_id: Uuid,
    pub name: String,
    pub description: String,
    pub command: String,
    pub enabled: bool,
    pub state: WorkerState,
    pub event_type: EventType,
    pub watchdog_event_count: u64,
}

/// Static engine identity sent as the first message of every hub session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfoPayload {
    pub engine_name: String,
    pub description: String,
    pub version: String,
    pub os: String,
    pub arch: String,
    pub started_at: DateTime<Utc>,
    pub worker_count: usize,
}

/// Describes a message the peer could not accept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterPayload {
    pub original_kind: MessageKind,
    pub source_engine_id: Uuid,
    pub original_timestamp: DateTime<Utc>,
    pub original_sequence: u64,
    pub method: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum MessagePayload {
    Metric(MetricPayload),
    LogEntry(LogEntryPayload),
    ImageFrame(ImageFramePayload),
    WorkerEvent(WorkerEventPayload),
    SystemInfo(SystemInfoPayload),
    DeadLetter(DeadLetterPayload),
}

impl MessagePayload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Metric(_) => MessageKind::Metric,
            Self::LogEntry(_) => MessageKind::LogEntry,
            Self::ImageFrame(_) => MessageKind::ImageFrame,
            Self::WorkerEvent(_) => MessageKind::WorkerEvent,
            Self::SystemInfo(_) => MessageKind::SystemInfo,
            Self::DeadLetter(_) => MessageKind::DeadLetter,
        }
    }

    /// Worker the payload belongs to, if any
    pub fn worker_id(&self) -> Option<Uuid> {
        match self {
            Self::Metric(m) => m.worker_id,
            Self::LogEntry(l) => l.worker_id,
            Self::ImageFrame(i) => Some(i.worker_id),
            Self::WorkerEvent(e) => Some(e.worker_id),
            Self::SystemInfo(_) | Self::DeadLetter(_) => None,
        }
    }
}

/// Enriched, immutable message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    engine_id: Uuid,
    sequence_number: u64,
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    payload: MessagePayload,
}

impl Envelope {
    pub(crate) fn new(
        engine_id: Uuid,
        sequence_number: u64,
        timestamp: DateTime<Utc>,
        payload: MessagePayload,
    ) -> Self {
        Self {
            engine_id,
            sequence_number,
            timestamp,
            payload,
        }
    }

    pub fn engine_id(&self) -> Uuid {
        self.engine_id
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    pub fn payload(&self) -> &MessagePayload {
        &self.payload
    }

    /// Single-slot queue key for payloads where only the latest value matters
    pub fn unique_key(&self) -> Option<String> {
        match &self.payload {
            MessagePayload::ImageFrame(frame) => Some(image_key(frame.worker_id)),
            _ => None,
        }
    }
}

/// Queue key holding the latest frame of a worker
pub fn image_key(worker_id: Uuid) -> String {
    format!("{IMAGE_KEY_PREFIX}{worker_id}")
}

/// Wire form of an envelope for one hub session, carrying that session's sequence number
#[derive(Debug, Serialize)]
pub struct ConnectionEnvelope<'a> {
    pub connection_sequence: u64,
    pub dispatched_at: DateTime<Utc>,
    #[serde(flatten)]
    pub envelope: &'a Envelope,
}

impl<'a> ConnectionEnvelope<'a> {
    pub fn new(connection_sequence: u64, envelope: &'a Envelope) -> Self {
        Self {
            connection_sequence,
            dispatched_at: Utc::now(),
            envelope,
        }
    }
}
