//! # Engine Telemetry
//!
//! Engine-level producers that are not tied to a single worker: the handshake payload sent
//! to every freshly connected hub and the periodic engine metrics.

pub mod metrics;
pub mod system_info;

pub use metrics::{MetricsCollector, METRIC_NAMES};
pub use system_info::SystemInfoProvider;
