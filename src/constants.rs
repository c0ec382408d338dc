//! # System Constants
//!
//! Defaults and fixed names that define the operational boundaries of the gateway.
//! Configuration values override the defaults; the remote method names are part of the
//! hub protocol and never change at runtime.

use std::time::Duration;

/// Remote method names understood by hub peers
pub mod methods {
    pub const RECEIVE_METRIC: &str = "ReceiveMetric";
    pub const RECEIVE_LOG: &str = "ReceiveLog";
    pub const RECEIVE_WORKER_LOG: &str = "ReceiveWorkerLog";
    pub const RECEIVE_IMAGE: &str = "ReceiveImage";
    pub const RECEIVE_WORKER_EVENT: &str = "ReceiveWorkerEvent";
    pub const RECEIVE_SYSTEM_INFO: &str = "ReceiveSystemInfo";
    pub const RECEIVE_DEAD_LETTER: &str = "ReceiveDeadLetter";
}

/// Inbound command names accepted from hub peers
pub mod commands {
    pub const START_WORKER: &str = "StartWorker";
    pub const STOP_WORKER: &str = "StopWorker";
    pub const REMOVE_WORKER: &str = "RemoveWorker";
    pub const RESET_WATCHDOG_EVENT_COUNT: &str = "ResetWatchdogEventCount";
    pub const ENABLE_DISABLE_WORKER: &str = "EnableDisableWorker";
    pub const EDIT_WORKER: &str = "EditWorker";
    pub const CREATE_WORKER: &str = "CreateWorker";
    pub const GET_WORKER_EVENTS_WITH_LOGS: &str = "GetWorkerEventsWithLogs";

    pub const ALL: [&str; 8] = [
        START_WORKER,
        STOP_WORKER,
        REMOVE_WORKER,
        RESET_WATCHDOG_EVENT_COUNT,
        ENABLE_DISABLE_WORKER,
        EDIT_WORKER,
        CREATE_WORKER,
        GET_WORKER_EVENTS_WITH_LOGS,
    ];
}

/// Registered streaming backend names
pub mod backends {
    pub const SIMULATED: &str = "simulated";
    pub const PROCESS: &str = "process";

    pub const ALL: [&str; 2] = [SIMULATED, PROCESS];
}

/// Per-kind capacity of a MultiQueue lane
pub const DEFAULT_QUEUE_CAPACITY: usize = 20;

/// Sequence counters wrap at 2^53 so peers can hold them in a double without loss
pub const SEQUENCE_MODULUS: u64 = 1 << 53;

/// Fixed delay between reconnect attempts to a hub
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Attempts made while waiting for a transitional worker state to settle
pub const DEFAULT_TRANSITION_RETRY_ATTEMPTS: u32 = 3;

/// Delay between transitional-state polls
pub const DEFAULT_TRANSITION_RETRY_DELAY: Duration = Duration::from_millis(500);

/// A running worker that has not produced a frame within this window is unhealthy
pub const DEFAULT_IMAGE_STALENESS: Duration = Duration::from_secs(2);

/// Number of buffered log lines attached to a watchdog event record
pub const DEFAULT_RECENT_LOG_LINES: usize = 20;

/// Lower bound for every watchdog delay
pub const MINIMUM_WATCHDOG_INTERVAL: Duration = Duration::from_secs(1);

pub const DEFAULT_WATCHDOG_GRACE_TIME: Duration = Duration::from_secs(10);
pub const DEFAULT_WATCHDOG_CHECK_INTERVAL: Duration = Duration::from_secs(2);

pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

/// Worker event records retained per worker by the in-memory repository
pub const MAX_WORKER_EVENTS_PER_WORKER: usize = 200;

/// Prefix of the unique queue key used for image frames
pub const IMAGE_KEY_PREFIX: &str = "image:";
