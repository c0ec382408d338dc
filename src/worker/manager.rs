//! # Worker Manager
//!
//! Fleet-level owner of every [`WorkerController`]. Implements the operations behind the
//! inbound worker commands and keeps the durable record, the live controller and the
//! published `WorkerEvent` stream consistent with each other.
//!
//! Read-modify-write cycles on a worker record hold that worker's entry in the shared
//! [`KeyedMutex`]. The lock is always released before a lifecycle operation (start, stop,
//! backend swap) runs, since the watchdog restart path takes the same lock.

use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::controller::{ControllerContext, WorkerController};
use super::registry::{BackendContext, BackendRegistry};
use super::state::{EventType, WorkerState};
use crate::commands::{CommandResult, CreateWorkerRequest, EditWorkerRequest};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::logging::log_worker_operation;
use crate::messaging::{MessagePayload, WorkerEventPayload};
use crate::repository::{ChangeLogEntry, WatchdogSettings, WorkerEntity, WorkerEventRecord};

const CHANGE_LOG_ENTITY: &str = "worker";

/// Fleet-wide defaults applied to new workers
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub default_backend: String,
    pub autostart_enabled: bool,
    pub default_watchdog: WatchdogSettings,
}

impl ManagerSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            default_backend: config.workers.default_backend.clone(),
            autostart_enabled: config.workers.autostart_enabled,
            default_watchdog: WatchdogSettings::from_config(config),
        }
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

pub struct WorkerManager {
    controllers: DashMap<Uuid, Arc<WorkerController>>,
    registry: Arc<BackendRegistry>,
    context: ControllerContext,
    settings: ManagerSettings,
}

impl WorkerManager {
    pub fn new(
        context: ControllerContext,
        registry: Arc<BackendRegistry>,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            controllers: DashMap::new(),
            registry,
            context,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn get(&self, worker_id: Uuid) -> Option<Arc<WorkerController>> {
        self.controllers.get(&worker_id).map(|entry| entry.value().clone())
    }

    pub fn worker_ids(&self) -> Vec<Uuid> {
        self.controllers.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    pub fn running_count(&self) -> usize {
        self.controllers
            .iter()
            .filter(|entry| entry.value().state() == WorkerState::Running)
            .count()
    }

    /// Current state of every worker as `WorkerEvent(Updated)` payloads
    pub fn snapshot(&self) -> Vec<WorkerEventPayload> {
        let controllers: Vec<Arc<WorkerController>> = self
            .controllers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        controllers
            .iter()
            .map(|controller| {
                controller
                    .entity()
                    .to_event(controller.state(), EventType::Updated)
            })
            .collect()
    }

    /// Build controllers for every stored worker and autostart the enabled ones
    pub async fn load_from_repository(&self) -> Result<usize> {
        let entities = self.context.repository.list_workers().await?;
        let mut loaded = 0;

        for entity in entities {
            if self.controllers.contains_key(&entity.id) {
                continue;
            }
            let enabled = entity.enabled;
            let worker_id = entity.id;
            match self.build_controller(entity) {
                Ok(controller) => {
                    self.controllers.insert(worker_id, controller.clone());
                    loaded += 1;
                    if enabled && self.settings.autostart_enabled {
                        let result = controller.start().await;
                        if !result.success {
                            warn!(worker_id = %worker_id, message = %result.message, "Autostart failed");
                        }
                    }
                }
                Err(e) => {
                    warn!(worker_id = %worker_id, error = %e, "Skipping worker with unusable configuration");
                }
            }
        }

        info!(workers = loaded, "👷 Workers loaded from repository");
        Ok(loaded)
    }

    pub async fn create_worker(&self, request: CreateWorkerRequest) -> Result<WorkerEntity> {
        if request.name.trim().is_empty() {
            return Err(GatewayError::validation("Worker name must not be empty"));
        }
        if request.command.trim().is_empty() {
            return Err(GatewayError::validation("Worker command must not be empty"));
        }

        let backend = request
            .backend
            .unwrap_or_else(|| self.settings.default_backend.clone());
        if !self.registry.contains(&backend) {
            return Err(GatewayError::UnknownBackend(backend));
        }

        let mut entity =
            WorkerEntity::new(request.name, request.description, request.command, backend);
        entity.enabled = request.enabled.unwrap_or(true);
        entity.watchdog = request.watchdog.unwrap_or(self.settings.default_watchdog);

        self.context.repository.create_worker(entity.clone()).await?;
        let controller = self.build_controller(entity.clone())?;
        self.controllers.insert(entity.id, controller.clone());

        controller.publish_event(EventType::Created);
        self.record_change(entity.id, "created", Some(entity.name.clone()))
            .await;
        log_worker_operation("create", entity.id, Some(&entity.name), "created", None);

        if entity.enabled && self.settings.autostart_enabled {
            let result = controller.start().await;
            if !result.success {
                warn!(worker_id = %entity.id, message = %result.message, "New worker failed to start");
            }
        }

        Ok(entity)
    }

    pub async fn edit_worker(&self, request: EditWorkerRequest) -> Result<WorkerEntity> {
        let worker_id = request.worker_id;
        let controller = self.controller(worker_id)?;

        if let Some(backend) = &request.backend {
            if !self.registry.contains(backend) {
                return Err(GatewayError::UnknownBackend(backend.clone()));
            }
        }

        let (entity, backend_changed) = {
            let _guard = self.context.worker_locks.lock(&worker_id).await;
            let mut entity = self.load_entity(worker_id).await?;
            let mut backend_changed = false;

            if let Some(name) = request.name {
                entity.name = name;
            }
            if let Some(description) = request.description {
                entity.description = description;
            }
            if let Some(command) = request.command {
                entity.command = command;
            }
            if let Some(backend) = request.backend {
                backend_changed = backend != controller.backend_name();
                entity.backend = backend;
            }
            if let Some(watchdog) = request.watchdog {
                entity.watchdog = watchdog;
            }
            entity.touch();
            self.context.repository.update_worker(entity.clone()).await?;
            controller.update_entity(entity.clone());
            (entity, backend_changed)
        };

        controller.set_command(entity.command.clone());
        controller.apply_watchdog_settings(&entity.watchdog);

        if backend_changed {
            let replacement = self.registry.create(
                &entity.backend,
                &BackendContext {
                    worker_id,
                    command: entity.command.clone(),
                },
            )?;
            let was_running = controller.desired_state() != WorkerState::Idle;
            if was_running {
                controller.stop().await;
            }
            controller.replace_backend(replacement).await;
            if was_running {
                let result = controller.start().await;
                if !result.success {
                    warn!(worker_id = %worker_id, message = %result.message, "Worker failed to restart on new backend");
                }
            }
        }

        controller.publish_event(EventType::Updated);
        self.record_change(worker_id, "edited", None).await;
        Ok(entity)
    }

    pub async fn remove_worker(&self, worker_id: Uuid) -> Result<()> {
        let (_, controller) = self
            .controllers
            .remove(&worker_id)
            .ok_or(GatewayError::WorkerNotFound(worker_id))?;

        let result = controller.shutdown().await;
        if !result.success {
            warn!(worker_id = %worker_id, message = %result.message, "Worker did not stop cleanly during removal");
        }

        let entity = controller.entity();
        if let Err(e) = self.context.repository.delete_worker(worker_id).await {
            warn!(worker_id = %worker_id, error = %e, "Failed to delete worker record");
        }
        self.context.worker_locks.remove(&worker_id);

        self.context
            .publisher
            .publish(MessagePayload::WorkerEvent(
                entity.to_event(WorkerState::Idle, EventType::Deleted),
            ));
        self.record_change(worker_id, "removed", Some(entity.name.clone()))
            .await;
        log_worker_operation("remove", worker_id, Some(&entity.name), "removed", None);
        Ok(())
    }

    /// Persist the flag, then start (enabled) or stop (disabled) the worker
    pub async fn set_enabled(&self, worker_id: Uuid, enabled: bool) -> Result<CommandResult> {
        let controller = self.controller(worker_id)?;

        {
            let _guard = self.context.worker_locks.lock(&worker_id).await;
            let mut entity = self.load_entity(worker_id).await?;
            entity.enabled = enabled;
            entity.touch();
            self.context.repository.update_worker(entity.clone()).await?;
            controller.update_entity(entity);
        }

        let action = if enabled { "enabled" } else { "disabled" };
        self.record_change(worker_id, action, None).await;

        let result = if enabled {
            controller.start().await
        } else {
            controller.stop().await
        };
        controller.publish_event(EventType::Updated);

        Ok(CommandResult {
            message: format!("Worker {action}: {}", result.message),
            ..result
        })
    }

    pub async fn start_worker(&self, worker_id: Uuid) -> Result<CommandResult> {
        let controller = self.controller(worker_id)?;
        if !controller.entity().enabled {
            return Ok(CommandResult::failure(format!(
                "Worker {worker_id} is disabled; enable it before starting"
            )));
        }
        Ok(controller.start().await)
    }

    pub async fn stop_worker(&self, worker_id: Uuid) -> Result<CommandResult> {
        let controller = self.controller(worker_id)?;
        Ok(controller.stop().await)
    }

    pub async fn reset_watchdog_event_count(&self, worker_id: Uuid) -> Result<WorkerEntity> {
        let controller = self.controller(worker_id)?;

        let entity = {
            let _guard = self.context.worker_locks.lock(&worker_id).await;
            let mut entity = self.load_entity(worker_id).await?;
            entity.watchdog_event_count = 0;
            entity.touch();
            self.context.repository.update_worker(entity.clone()).await?;
            controller.update_entity(entity.clone());
            entity
        };

        controller.publish_event(EventType::Updated);
        self.record_change(worker_id, "watchdog_count_reset", None)
            .await;
        Ok(entity)
    }

    pub async fn worker_events(
        &self,
        worker_id: Uuid,
        limit: usize,
    ) -> Result<Vec<WorkerEventRecord>> {
        self.controller(worker_id)?;
        self.context.repository.worker_events(worker_id, limit).await
    }

    /// Stop every worker; controllers stay registered
    pub async fn shutdown(&self) {
        let controllers: Vec<Arc<WorkerController>> = self
            .controllers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for controller in controllers {
            let result = controller.shutdown().await;
            debug!(worker_id = %controller.worker_id(), message = %result.message, "Worker shut down");
        }
        info!("👷 All workers stopped");
    }

    fn controller(&self, worker_id: Uuid) -> Result<Arc<WorkerController>> {
        self.get(worker_id)
            .ok_or(GatewayError::WorkerNotFound(worker_id))
    }

    async fn load_entity(&self, worker_id: Uuid) -> Result<WorkerEntity> {
        self.context
            .repository
            .get_worker(worker_id)
            .await?
            .ok_or(GatewayError::WorkerNotFound(worker_id))
    }

    fn build_controller(&self, entity: WorkerEntity) -> Result<Arc<WorkerController>> {
        let backend = self.registry.create(
            &entity.backend,
            &BackendContext {
                worker_id: entity.id,
                command: entity.command.clone(),
            },
        )?;
        Ok(WorkerController::new(entity, backend, self.context.clone()))
    }

    async fn record_change(&self, worker_id: Uuid, action: &str, details: Option<String>) {
        let entry = ChangeLogEntry::new(CHANGE_LOG_ENTITY, worker_id, action, details);
        if let Err(e) = self.context.repository.append_change_log(entry).await {
            warn!(worker_id = %worker_id, error = %e, "Failed to append change log entry");
        }
    }
}

impl fmt::Debug for WorkerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerManager")
            .field("workers", &self.controllers.len())
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .finish()
    }
}
