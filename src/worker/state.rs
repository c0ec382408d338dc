use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a worker, as reported by its streaming backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Not running; the initial and final stable state
    #[default]
    Idle,
    /// Backend start has been requested and has not settled yet
    Starting,
    /// Producing logs and frames
    Running,
    /// Backend stop has been requested and has not settled yet
    Stopping,
    /// Watchdog-driven stop/start cycle in progress
    Restarting,
}

impl WorkerState {
    /// Check if this state is time-bounded and expected to settle on its own
    pub fn is_transitional(&self) -> bool {
        matches!(self, Self::Starting | Self::Stopping | Self::Restarting)
    }

    /// Check if this is a stable resting state
    pub fn is_stable(&self) -> bool {
        !self.is_transitional()
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Restarting => write!(f, "restarting"),
        }
    }
}

impl std::str::FromStr for WorkerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "starting" => Ok(Self::Starting),
            "running" => Ok(Self::Running),
            "stopping" => Ok(Self::Stopping),
            "restarting" => Ok(Self::Restarting),
            _ => Err(format!("Invalid worker state: {s}")),
        }
    }
}

/// What happened to a worker, carried by every worker event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    Updated,
    Deleted,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitional_states() {
        assert!(WorkerState::Starting.is_transitional());
        assert!(WorkerState::Stopping.is_transitional());
        assert!(WorkerState::Restarting.is_transitional());
        assert!(WorkerState::Idle.is_stable());
        assert!(WorkerState::Running.is_stable());
    }

    #[test]
    fn test_state_string_conversion() {
        for state in [
            WorkerState::Idle,
            WorkerState::Starting,
            WorkerState::Running,
            WorkerState::Stopping,
            WorkerState::Restarting,
        ] {
            let parsed: WorkerState = state.to_string().parse().unwrap();
            assert_eq!(parsed, state);
        }
        assert!("paused".parse::<WorkerState>().is_err());
    }

    #[test]
    fn test_serde_representation() {
        let json = serde_json::to_string(&WorkerState::Restarting).unwrap();
        assert_eq!(json, "\"restarting\"");
        let json = serde_json::to_string(&EventType::Deleted).unwrap();
        assert_eq!(json, "\"deleted\"");
    }
}
