//! Fixed mapping from message kind to the hub method that receives it.

use crate::constants::methods;
use crate::messaging::{Envelope, MessagePayload};

/// Remote method for an envelope; total over every payload kind
pub fn method_for(envelope: &Envelope) -> &'static str {
    match envelope.payload() {
        MessagePayload::Metric(_) => methods::RECEIVE_METRIC,
        MessagePayload::LogEntry(entry) if entry.worker_id.is_some() => {
            methods::RECEIVE_WORKER_LOG
        }
        MessagePayload::LogEntry(_) => methods::RECEIVE_LOG,
        MessagePayload::ImageFrame(_) => methods::RECEIVE_IMAGE,
        MessagePayload::WorkerEvent(_) => methods::RECEIVE_WORKER_EVENT,
        MessagePayload::SystemInfo(_) => methods::RECEIVE_SYSTEM_INFO,
        MessagePayload::DeadLetter(_) => methods::RECEIVE_DEAD_LETTER,
    }
}
