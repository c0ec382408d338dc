//! Dispatches parsed inbound commands to the [`WorkerManager`].

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use super::{CommandHandler, CommandResult, InboundCommand};
use crate::error::Result;
use crate::worker::WorkerManager;

/// Default number of event records returned by `GetWorkerEventsWithLogs`
const DEFAULT_EVENTS_LIMIT: usize = 50;

#[derive(Debug, Clone)]
pub struct CommandRouter {
    workers: Arc<WorkerManager>,
}

impl CommandRouter {
    pub fn new(workers: Arc<WorkerManager>) -> Self {
        Self { workers }
    }

    /// Execute a parsed command
    pub async fn dispatch(&self, command: InboundCommand) -> Result<CommandResult> {
        match command {
            InboundCommand::StartWorker(r) => self.workers.start_worker(r.worker_id).await,
            InboundCommand::StopWorker(r) => self.workers.stop_worker(r.worker_id).await,
            InboundCommand::RemoveWorker(r) => {
                self.workers.remove_worker(r.worker_id).await?;
                Ok(CommandResult::ok(format!("Worker {} removed", r.worker_id)))
            }
            InboundCommand::ResetWatchdogEventCount(r) => {
                self.workers.reset_watchdog_event_count(r.worker_id).await?;
                Ok(CommandResult::ok("Watchdog event count reset"))
            }
            InboundCommand::EnableDisableWorker(r) => {
                self.workers.set_enabled(r.worker_id, r.enabled).await
            }
            InboundCommand::EditWorker(edit) => {
                let entity = self.workers.edit_worker(edit).await?;
                Ok(CommandResult::ok_with_data(
                    format!("Worker {} updated", entity.id),
                    serde_json::to_value(&entity)?,
                ))
            }
            InboundCommand::CreateWorker(create) => {
                let entity = self.workers.create_worker(create).await?;
                Ok(CommandResult::ok_with_data(
                    format!("Worker {} created", entity.name),
                    json!({ "worker_id": entity.id }),
                ))
            }
            InboundCommand::GetWorkerEventsWithLogs(query) => {
                let limit = query.limit.unwrap_or(DEFAULT_EVENTS_LIMIT);
                let events = self.workers.worker_events(query.worker_id, limit).await?;
                Ok(CommandResult::ok_with_data(
                    format!("{} worker events", events.len()),
                    serde_json::to_value(&events)?,
                ))
            }
        }
    }
}

#[async_trait]
impl CommandHandler for CommandRouter {
    async fn handle_command(&self, name: &str, payload: Value) -> CommandResult {
        let command = match InboundCommand::parse(name, payload) {
            Ok(command) => command,
            Err(e) => {
                warn!(command = %name, error = %e, "Rejected inbound command");
                return e.into();
            }
        };

        let worker_id = command.worker_id();
        let result = match self.dispatch(command).await {
            Ok(result) => result,
            Err(e) => e.into(),
        };

        debug!(
            command = %name,
            worker_id = ?worker_id,
            success = result.success,
            message = %result.message,
            "📨 Inbound command handled"
        );
        result
    }
}
