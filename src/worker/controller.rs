//! # Worker Controller
//!
//! Authoritative lifecycle owner for one worker. It holds the desired state, drives the
//! streaming backend, forwards the backend's logs and frames to the global queue, and owns
//! the worker's [`Watchdog`].
//!
//! ## Lifecycle rules
//!
//! - `start`/`stop` first wait (bounded) for a transitional backend state to settle and
//!   fail without side effects if it does not.
//! - `start` arms the watchdog even when the backend fails to start, so a failed start is
//!   retried automatically.
//! - `stop` disarms the watchdog before stopping the backend.
//! - A watchdog trigger marks the worker `Restarting`, records the event durably, and runs a
//!   stop/start cycle on a separate task. If the stop half fails the desired state reverts
//!   to `Idle`.
//!
//! Backend state changes are processed in order by a per-controller task that reloads the
//! durable worker record and publishes a `WorkerEvent(Updated)`. Watchdog restart outcomes are
//! published as worker log entries.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::backend::{BackendCallbacks, StreamingBackend};
use super::log_buffer::LogBuffer;
use super::state::{EventType, WorkerState};
use crate::commands::CommandResult;
use crate::config::GatewayConfig;
use crate::constants;
use crate::error::{GatewayError, Result};
use crate::logging::{log_error, log_worker_operation};
use crate::messaging::{
    ImageFramePayload, LogEntryPayload, LogLevel, MessagePayload, MessagePublisher,
};
use crate::repository::{KeyedMutex, Repository, WatchdogSettings, WorkerEntity};
use crate::resilience::{RestartCheck, Watchdog, WatchdogOptions, WatchdogStateChanged};

/// Reason reported when a running worker stops producing frames
pub const IMAGE_UPDATE_MISSING: &str = "Image update missing";

/// Behavioural knobs shared by every controller
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub transition_retry_attempts: u32,
    pub transition_retry_delay: Duration,
    pub image_staleness: Duration,
    pub recent_log_lines: usize,
    pub minimum_watchdog_interval: Duration,
}

impl ControllerSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            transition_retry_attempts: config.workers.transition_retry_attempts,
            transition_retry_delay: config.workers.transition_retry_delay(),
            image_staleness: config.workers.image_staleness(),
            recent_log_lines: config.workers.recent_log_lines,
            minimum_watchdog_interval: config.watchdog.minimum_interval(),
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            transition_retry_attempts: constants::DEFAULT_TRANSITION_RETRY_ATTEMPTS,
            transition_retry_delay: constants::DEFAULT_TRANSITION_RETRY_DELAY,
            image_staleness: constants::DEFAULT_IMAGE_STALENESS,
            recent_log_lines: constants::DEFAULT_RECENT_LOG_LINES,
            minimum_watchdog_interval: constants::MINIMUM_WATCHDOG_INTERVAL,
        }
    }
}

/// Collaborators shared by every controller of an engine
#[derive(Clone)]
pub struct ControllerContext {
    pub publisher: MessagePublisher,
    pub repository: Arc<dyn Repository>,
    pub worker_locks: Arc<KeyedMutex<Uuid>>,
    pub settings: ControllerSettings,
}

pub struct WorkerController {
    worker_id: Uuid,
    backend: RwLock<Arc<dyn StreamingBackend>>,
    entity: RwLock<WorkerEntity>,
    desired: RwLock<WorkerState>,
    last_activity: Mutex<Instant>,
    logs: LogBuffer,
    watchdog: Watchdog,
    operation: tokio::sync::Mutex<()>,
    restart_in_flight: AtomicBool,
    state_changes: mpsc::UnboundedSender<WorkerState>,
    context: ControllerContext,
    self_ref: Weak<WorkerController>,
}

impl WorkerController {
    /// Build a controller around `backend`. Must be called within a Tokio runtime.
    pub fn new(
        entity: WorkerEntity,
        backend: Arc<dyn StreamingBackend>,
        context: ControllerContext,
    ) -> Arc<Self> {
        let (state_tx, state_rx) = mpsc::unbounded_channel();
        let worker_id = entity.id;
        let options = WatchdogOptions {
            grace_time: entity.watchdog.grace_time(),
            check_interval: entity.watchdog.check_interval(),
            minimum_interval: context.settings.minimum_watchdog_interval,
            enabled: entity.watchdog.enabled,
        };
        let log_capacity = context.settings.recent_log_lines;

        let controller = Arc::new_cyclic(|weak: &Weak<WorkerController>| {
            let check_ref = weak.clone();
            let restart_ref = weak.clone();
            let watchdog = Watchdog::new(
                worker_id,
                options,
                move || {
                    check_ref
                        .upgrade()
                        .map(|controller| controller.health_check())
                        .unwrap_or_else(RestartCheck::healthy)
                },
                move |reason| {
                    let controller = restart_ref.upgrade();
                    async move {
                        match controller {
                            Some(controller) => controller.on_watchdog_triggered(reason).await,
                            None => Ok(()),
                        }
                    }
                },
            );

            WorkerController {
                worker_id,
                backend: RwLock::new(backend.clone()),
                entity: RwLock::new(entity),
                desired: RwLock::new(WorkerState::Idle),
                last_activity: Mutex::new(Instant::now()),
                logs: LogBuffer::new(log_capacity),
                watchdog,
                operation: tokio::sync::Mutex::new(()),
                restart_in_flight: AtomicBool::new(false),
                state_changes: state_tx,
                context,
                self_ref: weak.clone(),
            }
        });

        let publisher = controller.context.publisher.clone();
        controller
            .watchdog
            .subscribe(move |event: WatchdogStateChanged| {
                let level = if event.restart_succeeded {
                    LogLevel::Warning
                } else {
                    LogLevel::Error
                };
                publisher.publish(MessagePayload::LogEntry(LogEntryPayload {
                    worker_id: Some(event.worker_id),
                    level,
                    message: event.message,
                    logged_at: event.occurred_at,
                }));
                std::future::ready(())
            });

        controller.attach(&backend);
        tokio::spawn(Self::state_change_loop(
            Arc::downgrade(&controller),
            state_rx,
        ));
        controller
    }

    pub fn worker_id(&self) -> Uuid {
        self.worker_id
    }

    /// Actual state as reported by the backend
    pub fn state(&self) -> WorkerState {
        self.backend().state()
    }

    pub fn desired_state(&self) -> WorkerState {
        *self.desired.read()
    }

    pub fn backend(&self) -> Arc<dyn StreamingBackend> {
        self.backend.read().clone()
    }

    pub fn backend_name(&self) -> String {
        self.backend().name().to_string()
    }

    /// Last known copy of the durable worker record
    pub fn entity(&self) -> WorkerEntity {
        self.entity.read().clone()
    }

    pub fn update_entity(&self, entity: WorkerEntity) {
        *self.entity.write() = entity;
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    pub fn recent_logs(&self, count: usize) -> Vec<String> {
        self.logs.recent(count)
    }

    /// Time since the last frame (or since the last start when no frame arrived yet)
    pub fn image_age(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    pub async fn start(&self) -> CommandResult {
        let _operation = self.operation.lock().await;
        *self.desired.write() = WorkerState::Running;
        self.start_locked().await
    }

    pub async fn stop(&self) -> CommandResult {
        let _operation = self.operation.lock().await;
        *self.desired.write() = WorkerState::Idle;
        self.stop_locked().await
    }

    /// Takes effect on the next start
    pub fn set_command(&self, command: impl Into<String>) {
        let command = command.into();
        self.backend().set_command(command.clone());
        self.entity.write().command = command;
    }

    /// Apply watchdog settings to the live watchdog
    pub fn apply_watchdog_settings(&self, settings: &WatchdogSettings) {
        self.watchdog.update_grace_time(settings.grace_time());
        self.watchdog.update_check_interval(settings.check_interval());
        self.watchdog.set_enabled(settings.enabled);
        self.entity.write().watchdog = *settings;
    }

    /// Move callbacks and command onto `new_backend` and return the previous backend
    pub async fn replace_backend(
        &self,
        new_backend: Arc<dyn StreamingBackend>,
    ) -> Arc<dyn StreamingBackend> {
        let _operation = self.operation.lock().await;
        let old_backend = self.backend();
        old_backend.clear_callbacks();
        new_backend.set_command(old_backend.command());
        self.attach(&new_backend);
        *self.backend.write() = new_backend.clone();

        info!(
            worker_id = %self.worker_id,
            old_backend = %old_backend.name(),
            new_backend = %new_backend.name(),
            "🔁 Streaming backend replaced"
        );
        old_backend
    }

    /// Disarm the watchdog, stop the backend and detach its callbacks
    pub async fn shutdown(&self) -> CommandResult {
        let result = self.stop().await;
        self.backend().clear_callbacks();
        result
    }

    /// Publish a worker event built from the cached record and the current state
    pub fn publish_event(&self, event_type: EventType) {
        let event = self.entity.read().to_event(self.state(), event_type);
        self.context
            .publisher
            .publish(MessagePayload::WorkerEvent(event));
    }

    /// Health predicate evaluated by the watchdog
    pub fn health_check(&self) -> RestartCheck {
        let desired = self.desired_state();
        let actual = self.state();

        if matches!(desired, WorkerState::Idle | WorkerState::Restarting)
            || actual == WorkerState::Restarting
        {
            return RestartCheck::healthy();
        }

        if actual != WorkerState::Running {
            return RestartCheck::restart(format!("Worker is {actual} but should be {desired}"));
        }

        if self.image_age() > self.context.settings.image_staleness {
            return RestartCheck::restart(IMAGE_UPDATE_MISSING);
        }

        RestartCheck::healthy()
    }

    /// Reload the durable record and publish the new state
    pub async fn handle_state_change(&self, state: WorkerState) {
        debug!(worker_id = %self.worker_id, state = %state, "Backend state changed");

        // Held across the reload so an edit cannot land between the read and the cache write
        let entity = {
            let _guard = self.context.worker_locks.lock(&self.worker_id).await;
            match self.context.repository.get_worker(self.worker_id).await {
                Ok(Some(entity)) => {
                    *self.entity.write() = entity.clone();
                    entity
                }
                Ok(None) => {
                    warn!(
                        worker_id = %self.worker_id,
                        state = %state,
                        "Worker record missing, state change not published"
                    );
                    return;
                }
                Err(e) => {
                    warn!(
                        worker_id = %self.worker_id,
                        error = %e,
                        "Repository unavailable, publishing state change from cached record"
                    );
                    self.entity.read().clone()
                }
            }
        };

        self.context
            .publisher
            .publish(MessagePayload::WorkerEvent(
                entity.to_event(state, EventType::Updated),
            ));
    }

    /// Watchdog restart action: record the trigger, then restart on a separate task
    pub async fn on_watchdog_triggered(&self, reason: String) -> Result<()> {
        error!(
            worker_id = %self.worker_id,
            reason = %reason,
            "🚨 Watchdog triggered for worker"
        );

        {
            let mut desired = self.desired.write();
            if *desired == WorkerState::Idle {
                debug!(worker_id = %self.worker_id, "Worker stopped meanwhile, restart skipped");
                return Ok(());
            }
            if self.restart_in_flight.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            *desired = WorkerState::Restarting;
        }

        if let Err(e) = self.increment_watchdog_event_count().await {
            warn!(worker_id = %self.worker_id, error = %e, "Failed to persist watchdog event count");
        }

        let recent = self.logs.recent(self.context.settings.recent_log_lines);
        if let Err(e) = self
            .context
            .repository
            .append_worker_event(self.worker_id, format!("Watchdog triggered: {reason}"), recent)
            .await
        {
            warn!(worker_id = %self.worker_id, error = %e, "Failed to record watchdog event");
        }

        let controller = self
            .self_ref
            .upgrade()
            .ok_or_else(|| GatewayError::Internal("worker controller dropped".to_string()))?;
        tokio::spawn(async move { controller.restart_cycle(reason).await });
        Ok(())
    }

    async fn restart_cycle(self: Arc<Self>, reason: String) {
        let _operation = self.operation.lock().await;

        if self.desired_state() != WorkerState::Restarting {
            info!(worker_id = %self.worker_id, "Restart superseded by an explicit command");
            self.restart_in_flight.store(false, Ordering::SeqCst);
            return;
        }

        let name = self.entity.read().name.clone();
        log_worker_operation("restart", self.worker_id, Some(&name), "stopping", Some(&reason));

        let stopped = self.stop_locked().await;
        if !stopped.success {
            let context = format!("worker {} could not be stopped, restart abandoned", self.worker_id);
            log_error("worker_controller", "restart", &stopped.message, Some(&context));
            *self.desired.write() = WorkerState::Idle;
            self.watchdog.stop().await;
            self.restart_in_flight.store(false, Ordering::SeqCst);
            self.publish_event(EventType::Updated);
            return;
        }

        *self.desired.write() = WorkerState::Running;
        let started = self.start_locked().await;
        self.restart_in_flight.store(false, Ordering::SeqCst);

        let status = if started.success { "running" } else { "start_failed" };
        log_worker_operation("restart", self.worker_id, Some(&name), status, Some(&started.message));
    }

    async fn start_locked(&self) -> CommandResult {
        let backend = self.backend();
        let settled = match self.wait_for_settled(backend.as_ref()).await {
            Ok(state) => state,
            Err(state) => return self.transition_timeout(state),
        };

        if settled == WorkerState::Running {
            if !self.watchdog.is_running() {
                self.watchdog.start().await;
            }
            return CommandResult::ok("Worker already running");
        }

        *self.last_activity.lock() = Instant::now();
        let outcome = backend.start().await;
        self.watchdog.start().await;

        if outcome.success {
            log_worker_operation("start", self.worker_id, None, "running", None);
            CommandResult::ok(format!("Worker started: {}", outcome.message))
        } else {
            warn!(
                worker_id = %self.worker_id,
                message = %outcome.message,
                "Backend failed to start, watchdog armed for retry"
            );
            CommandResult::failure(format!("Worker failed to start: {}", outcome.message))
        }
    }

    async fn stop_locked(&self) -> CommandResult {
        let backend = self.backend();
        let settled = match self.wait_for_settled(backend.as_ref()).await {
            Ok(state) => state,
            Err(state) => return self.transition_timeout(state),
        };

        self.watchdog.stop().await;

        if settled == WorkerState::Idle {
            return CommandResult::ok("Worker already stopped");
        }

        let outcome = backend.stop().await;
        if outcome.success {
            log_worker_operation("stop", self.worker_id, None, "idle", None);
            CommandResult::ok(format!("Worker stopped: {}", outcome.message))
        } else {
            CommandResult::failure(format!("Worker failed to stop: {}", outcome.message))
        }
    }

    /// Poll a transitional backend until it settles; `Err` carries the state it is stuck in
    async fn wait_for_settled(
        &self,
        backend: &dyn StreamingBackend,
    ) -> std::result::Result<WorkerState, WorkerState> {
        let mut state = backend.state();
        let mut attempts = 0;
        while state.is_transitional() && attempts < self.context.settings.transition_retry_attempts
        {
            attempts += 1;
            tokio::time::sleep(self.context.settings.transition_retry_delay).await;
            state = backend.state();
        }

        if state.is_transitional() {
            Err(state)
        } else {
            Ok(state)
        }
    }

    fn transition_timeout(&self, state: WorkerState) -> CommandResult {
        warn!(
            worker_id = %self.worker_id,
            state = %state,
            "Worker still transitioning after retry budget"
        );
        CommandResult::failure(format!(
            "Worker is still {state} after {} attempts; try again later",
            self.context.settings.transition_retry_attempts
        ))
    }

    async fn increment_watchdog_event_count(&self) -> Result<()> {
        let _guard = self.context.worker_locks.lock(&self.worker_id).await;
        let mut entity = self
            .context
            .repository
            .get_worker(self.worker_id)
            .await?
            .ok_or(GatewayError::WorkerNotFound(self.worker_id))?;
        entity.watchdog_event_count += 1;
        entity.touch();
        self.context.repository.update_worker(entity.clone()).await?;
        *self.entity.write() = entity;
        Ok(())
    }

    fn attach(&self, backend: &Arc<dyn StreamingBackend>) {
        let log_ref = self.self_ref.clone();
        let image_ref = self.self_ref.clone();
        let states = self.state_changes.clone();

        backend.set_callbacks(BackendCallbacks {
            on_log: Some(Arc::new(move |level, line| {
                if let Some(controller) = log_ref.upgrade() {
                    controller.handle_log(level, line);
                }
            })),
            on_image: Some(Arc::new(move |frame| {
                if let Some(controller) = image_ref.upgrade() {
                    controller.handle_image(frame);
                }
            })),
            on_state_change: Some(Arc::new(move |state| {
                let _ = states.send(state);
            })),
        });
    }

    fn handle_log(&self, level: LogLevel, line: String) {
        self.logs.push(line.clone());
        self.context
            .publisher
            .publish(MessagePayload::LogEntry(LogEntryPayload {
                worker_id: Some(self.worker_id),
                level,
                message: line,
                logged_at: Utc::now(),
            }));
    }

    fn handle_image(&self, frame: Vec<u8>) {
        *self.last_activity.lock() = Instant::now();
        self.context
            .publisher
            .publish(MessagePayload::ImageFrame(ImageFramePayload {
                worker_id: self.worker_id,
                data: frame,
            }));
    }

    async fn state_change_loop(
        controller: Weak<WorkerController>,
        mut states: mpsc::UnboundedReceiver<WorkerState>,
    ) {
        while let Some(state) = states.recv().await {
            match controller.upgrade() {
                Some(controller) => controller.handle_state_change(state).await,
                None => break,
            }
        }
    }
}

impl fmt::Debug for WorkerController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerController")
            .field("worker_id", &self.worker_id)
            .field("backend", &self.backend_name())
            .field("desired", &self.desired_state())
            .field("actual", &self.state())
            .finish()
    }
}
