//! # Inbound Commands
//!
//! Commands a hub peer can send to the engine, their structured payloads, and the uniform
//! [`CommandResult`] every command returns. Parsing never panics: an unknown command name
//! or a malformed payload becomes a failed result.

pub mod router;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::constants::commands;
use crate::error::{GatewayError, Result};
use crate::repository::WatchdogSettings;

pub use router::CommandRouter;

/// Outcome of a command, returned to the caller verbatim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CommandResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn ok_with_data(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

impl From<GatewayError> for CommandResult {
    fn from(error: GatewayError) -> Self {
        Self::failure(error.to_string())
    }
}

/// Receives commands delivered by a hub session
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle_command(&self, name: &str, payload: Value) -> CommandResult;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRef {
    pub worker_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnableDisableRequest {
    pub worker_id: Uuid,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateWorkerRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub command: String,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub watchdog: Option<WatchdogSettings>,
}

/// Fields left as `None` keep their current value
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EditWorkerRequest {
    pub worker_id: Uuid,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub watchdog: Option<WatchdogSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerEventsQuery {
    pub worker_id: Uuid,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundCommand {
    StartWorker(WorkerRef),
    StopWorker(WorkerRef),
    RemoveWorker(WorkerRef),
    ResetWatchdogEventCount(WorkerRef),
    EnableDisableWorker(EnableDisableRequest),
    EditWorker(EditWorkerRequest),
    CreateWorker(CreateWorkerRequest),
    GetWorkerEventsWithLogs(WorkerEventsQuery),
}

impl InboundCommand {
    /// Decode a named command and its JSON payload
    pub fn parse(name: &str, payload: Value) -> Result<Self> {
        let command = match name {
            commands::START_WORKER => Self::StartWorker(decode(name, payload)?),
            commands::STOP_WORKER => Self::StopWorker(decode(name, payload)?),
            commands::REMOVE_WORKER => Self::RemoveWorker(decode(name, payload)?),
            commands::RESET_WATCHDOG_EVENT_COUNT => {
                Self::ResetWatchdogEventCount(decode(name, payload)?)
            }
            commands::ENABLE_DISABLE_WORKER => Self::EnableDisableWorker(decode(name, payload)?),
            commands::EDIT_WORKER => Self::EditWorker(decode(name, payload)?),
            commands::CREATE_WORKER => Self::CreateWorker(decode(name, payload)?),
            commands::GET_WORKER_EVENTS_WITH_LOGS => {
                Self::GetWorkerEventsWithLogs(decode(name, payload)?)
            }
            other => {
                return Err(GatewayError::validation(format!("Unknown command '{other}'")));
            }
        };
        Ok(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::StartWorker(_) => commands::START_WORKER,
            Self::StopWorker(_) => commands::STOP_WORKER,
            Self::RemoveWorker(_) => commands::REMOVE_WORKER,
            Self::ResetWatchdogEventCount(_) => commands::RESET_WATCHDOG_EVENT_COUNT,
            Self::EnableDisableWorker(_) => commands::ENABLE_DISABLE_WORKER,
            Self::EditWorker(_) => commands::EDIT_WORKER,
            Self::CreateWorker(_) => commands::CREATE_WORKER,
            Self::GetWorkerEventsWithLogs(_) => commands::GET_WORKER_EVENTS_WITH_LOGS,
        }
    }

    /// Worker addressed by the command, if it addresses an existing one
    pub fn worker_id(&self) -> Option<Uuid> {
        match self {
            Self::StartWorker(r)
            | Self::StopWorker(r)
            | Self::RemoveWorker(r)
            | Self::ResetWatchdogEventCount(r) => Some(r.worker_id),
            Self::EnableDisableWorker(r) => Some(r.worker_id),
            Self::EditWorker(r) => Some(r.worker_id),
            Self::GetWorkerEventsWithLogs(q) => Some(q.worker_id),
            Self::CreateWorker(_) => None,
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(name: &str, payload: Value) -> Result<T> {
    serde_json::from_value(payload)
        .map_err(|e| GatewayError::validation(format!("Invalid payload for {name}: {e}")))
}
