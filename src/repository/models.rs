//! Durable entity models owned by the repository.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::messaging::WorkerEventPayload;
use crate::worker::state::{EventType, WorkerState};

/// Per-worker watchdog configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogSettings {
    pub enabled: bool,
    pub grace_time_ms: u64,
    pub check_interval_ms: u64,
}

impl WatchdogSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            enabled: true,
            grace_time_ms: config.watchdog.default_grace_time_ms,
            check_interval_ms: config.watchdog.default_check_interval_ms,
        }
    }

    pub fn grace_time(&self) -> Duration {
        Duration::from_millis(self.grace_time_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

/// Durable worker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerEntity {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub command: String,
    /// Registered streaming backend name
    pub backend: String,
    pub enabled: bool,
    pub watchdog: WatchdogSettings,
    pub watchdog_event_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkerEntity {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        command: impl Into<String>,
        backend: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            command: command.into(),
            backend: backend.into(),
            enabled: true,
            watchdog: WatchdogSettings::default(),
            watchdog_event_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn to_event(&self, state: WorkerState, event_type: EventType) -> WorkerEventPayload {
        WorkerEventPayload {
            worker_id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            command: self.command.clone(),
            enabled: self.enabled,
            state,
            event_type,
            watchdog_event_count: self.watchdog_event_count,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Durable record of a notable worker event together with the log lines preceding it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerEventRecord {
    pub id: Uuid,
    pub worker_id: Uuid,
    pub message: String,
    pub logs: Vec<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Audit trail entry for configuration changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub id: Uuid,
    pub entity: String,
    pub entity_id: String,
    pub action: String,
    pub details: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl ChangeLogEntry {
    pub fn new(
        entity: impl Into<String>,
        entity_id: impl ToString,
        action: impl Into<String>,
        details: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity: entity.into(),
            entity_id: entity_id.to_string(),
            action: action.into(),
            details,
            recorded_at: Utc::now(),
        }
    }
}

/// Durable engine identity and hub list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEntity {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub hub_urls: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl EngineEntity {
    pub fn new(id: Uuid, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: description.into(),
            hub_urls: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_entity_to_event() {
        let mut entity = WorkerEntity::new("cam-1", "loading dock", "ffmpeg -i rtsp://x", "process");
        entity.watchdog_event_count = 4;

        let event = entity.to_event(WorkerState::Running, EventType::Updated);
        assert_eq!(event.worker_id, entity.id);
        assert_eq!(event.name, "cam-1");
        assert_eq!(event.state, WorkerState::Running);
        assert_eq!(event.event_type, EventType::Updated);
        assert_eq!(event.watchdog_event_count, 4);
    }

    #[test]
    fn test_default_watchdog_settings() {
        let settings = WatchdogSettings::default();
        assert!(settings.enabled);
        assert_eq!(settings.grace_time(), Duration::from_secs(10));
        assert_eq!(settings.check_interval(), Duration::from_secs(2));
    }
}
