//! # Gateway Configuration System
//!
//! Typed configuration for the engine gateway. Every section carries documented
//! defaults so a minimal file (or no file at all) yields a working engine, while
//! explicit validation rejects values that would break the runtime invariants
//! (zero-capacity queues, zero retry budgets, malformed hub URLs).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use engine_gateway::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load_from_file("config/engine-gateway.yaml", "production")?;
//! let reconnect = manager.config().hubs.reconnect_delay();
//! let capacity = manager.config().queue.kind_capacity;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::constants;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring engine-gateway.yaml
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Engine identity reported to hubs
    pub engine: EngineConfig,

    /// Global and per-peer queue sizing
    pub queue: QueueConfig,

    /// Hub peers and reconnection policy
    pub hubs: HubsConfig,

    /// Worker controller behaviour
    pub workers: WorkersConfig,

    /// Watchdog defaults and bounds
    pub watchdog: WatchdogConfig,

    /// Engine-level metric collection
    pub telemetry: TelemetryConfig,
}

/// Engine identity
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Stable engine id; generated when neither the config nor the repository has one
    pub engine_id: Option<Uuid>,
    pub name: String,
    pub description: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine_id: None,
            name: "engine".to_string(),
            description: String::new(),
        }
    }
}

/// MultiQueue sizing
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Capacity of each message-kind lane of the global queue
    pub kind_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            kind_capacity: constants::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Hub peer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HubsConfig {
    /// Peer URLs connected at startup (merged with the ones stored in the repository)
    pub urls: Vec<String>,
    /// Fixed delay between reconnect attempts
    pub reconnect_delay_ms: u64,
    /// Capacity of each message-kind lane of a peer queue
    pub peer_queue_capacity: usize,
}

impl Default for HubsConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            reconnect_delay_ms: constants::DEFAULT_RECONNECT_DELAY.as_millis() as u64,
            peer_queue_capacity: constants::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl HubsConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Worker controller configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Polls made while a backend is in a transitional state
    pub transition_retry_attempts: u32,
    pub transition_retry_delay_ms: u64,
    /// Frame silence after which a running worker is considered hung
    pub image_staleness_ms: u64,
    /// Log lines attached to watchdog event records
    pub recent_log_lines: usize,
    /// Backend used when a worker does not name one
    pub default_backend: String,
    /// Start enabled workers when the engine boots or a worker is created
    pub autostart_enabled: bool,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            transition_retry_attempts: constants::DEFAULT_TRANSITION_RETRY_ATTEMPTS,
            transition_retry_delay_ms: constants::DEFAULT_TRANSITION_RETRY_DELAY.as_millis() as u64,
            image_staleness_ms: constants::DEFAULT_IMAGE_STALENESS.as_millis() as u64,
            recent_log_lines: constants::DEFAULT_RECENT_LOG_LINES,
            default_backend: constants::backends::SIMULATED.to_string(),
            autostart_enabled: true,
        }
    }
}

impl WorkersConfig {
    pub fn transition_retry_delay(&self) -> Duration {
        Duration::from_millis(self.transition_retry_delay_ms)
    }

    pub fn image_staleness(&self) -> Duration {
        Duration::from_millis(self.image_staleness_ms)
    }
}

/// Watchdog configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Lower clamp applied to grace time and check interval
    pub minimum_interval_ms: u64,
    /// Defaults for workers created without explicit watchdog settings
    pub default_grace_time_ms: u64,
    pub default_check_interval_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            minimum_interval_ms: constants::MINIMUM_WATCHDOG_INTERVAL.as_millis() as u64,
            default_grace_time_ms: constants::DEFAULT_WATCHDOG_GRACE_TIME.as_millis() as u64,
            default_check_interval_ms: constants::DEFAULT_WATCHDOG_CHECK_INTERVAL.as_millis()
                as u64,
        }
    }
}

impl WatchdogConfig {
    pub fn minimum_interval(&self) -> Duration {
        Duration::from_millis(self.minimum_interval_ms)
    }
}

/// Engine metric collection
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub metrics_enabled: bool,
    pub metrics_interval_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            metrics_interval_ms: constants::DEFAULT_METRICS_INTERVAL.as_millis() as u64,
        }
    }
}

impl TelemetryConfig {
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms)
    }
}

impl GatewayConfig {
    /// Validate configuration values that the runtime relies on
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.engine.name.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "engine.name",
                "engine configuration",
            ));
        }

        if self.queue.kind_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "queue.kind_capacity",
                "0",
                "queue capacity must be greater than 0",
            ));
        }

        if self.hubs.peer_queue_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "hubs.peer_queue_capacity",
                "0",
                "peer queue capacity must be greater than 0",
            ));
        }

        for url in &self.hubs.urls {
            validate_hub_url(url)?;
        }

        if self.workers.transition_retry_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "workers.transition_retry_attempts",
                "0",
                "at least one attempt is required",
            ));
        }

        if self.workers.default_backend.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "workers.default_backend",
                "workers configuration",
            ));
        }

        if self.watchdog.minimum_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "watchdog.minimum_interval_ms",
                "0",
                "minimum interval must be greater than 0",
            ));
        }

        if self.telemetry.metrics_enabled && self.telemetry.metrics_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "telemetry.metrics_interval_ms",
                "0",
                "metrics interval must be greater than 0 when metrics are enabled",
            ));
        }

        Ok(())
    }
}

/// Check that a hub URL has a scheme and a host part
pub fn validate_hub_url(url: &str) -> Result<(), ConfigurationError> {
    let trimmed = url.trim();
    let valid = trimmed
        .split_once("://")
        .map(|(scheme, rest)| {
            !scheme.is_empty()
                && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+')
                && !rest.is_empty()
                && !rest.starts_with('/')
        })
        .unwrap_or(false);

    if valid {
        Ok(())
    } else {
        Err(ConfigurationError::invalid_value(
            "hubs.urls",
            url,
            "hub URL must look like scheme://host[:port][/path]",
        ))
    }
}
