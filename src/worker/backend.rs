//! # Streaming Backend Contract
//!
//! A backend drives the external media producer of one worker. It reports state changes,
//! log lines and encoded frames through explicitly registered callbacks; the controller
//! registers them once and can detach them when the backend is replaced or removed.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

use super::state::WorkerState;
use crate::messaging::LogLevel;

pub type LogCallback = Arc<dyn Fn(LogLevel, String) + Send + Sync>;
pub type ImageCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;
pub type StateChangeCallback = Arc<dyn Fn(WorkerState) + Send + Sync>;

/// Callback registrations handed to a backend
#[derive(Clone, Default)]
pub struct BackendCallbacks {
    pub on_log: Option<LogCallback>,
    pub on_image: Option<ImageCallback>,
    pub on_state_change: Option<StateChangeCallback>,
}

impl fmt::Debug for BackendCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendCallbacks")
            .field("on_log", &self.on_log.is_some())
            .field("on_image", &self.on_image.is_some())
            .field("on_state_change", &self.on_state_change.is_some())
            .finish()
    }
}

/// Result of a start or stop request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOutcome {
    pub success: bool,
    pub state: WorkerState,
    pub message: String,
}

impl BackendOutcome {
    pub fn ok(state: WorkerState, message: impl Into<String>) -> Self {
        Self {
            success: true,
            state,
            message: message.into(),
        }
    }

    pub fn failed(state: WorkerState, message: impl Into<String>) -> Self {
        Self {
            success: false,
            state,
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait StreamingBackend: Send + Sync + fmt::Debug {
    /// Registered backend name
    fn name(&self) -> &str;

    async fn start(&self) -> BackendOutcome;

    async fn stop(&self) -> BackendOutcome;

    fn state(&self) -> WorkerState;

    fn command(&self) -> String;

    /// Takes effect on the next start
    fn set_command(&self, command: String);

    fn set_callbacks(&self, callbacks: BackendCallbacks);

    fn clear_callbacks(&self);
}

/// State, command and callback slots shared by the bundled backends
#[derive(Debug, Default)]
pub struct BackendCore {
    state: RwLock<WorkerState>,
    command: RwLock<String>,
    callbacks: RwLock<BackendCallbacks>,
}

impl BackendCore {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(WorkerState::Idle),
            command: RwLock::new(command.into()),
            callbacks: RwLock::new(BackendCallbacks::default()),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.read()
    }

    /// Update the state and notify the state-change callback when it actually changed
    pub fn set_state(&self, new_state: WorkerState) {
        let changed = {
            let mut state = self.state.write();
            let changed = *state != new_state;
            *state = new_state;
            changed
        };
        if changed {
            let callback = self.callbacks.read().on_state_change.clone();
            if let Some(callback) = callback {
                callback(new_state);
            }
        }
    }

    pub fn command(&self) -> String {
        self.command.read().clone()
    }

    pub fn set_command(&self, command: String) {
        *self.command.write() = command;
    }

    pub fn set_callbacks(&self, callbacks: BackendCallbacks) {
        *self.callbacks.write() = callbacks;
    }

    pub fn clear_callbacks(&self) {
        *self.callbacks.write() = BackendCallbacks::default();
    }

    pub fn emit_log(&self, level: LogLevel, line: impl Into<String>) {
        let callback = self.callbacks.read().on_log.clone();
        if let Some(callback) = callback {
            callback(level, line.into());
        }
    }

    pub fn emit_image(&self, frame: Vec<u8>) {
        let callback = self.callbacks.read().on_image.clone();
        if let Some(callback) = callback {
            callback(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_state_callback_fires_only_on_change() {
        let core = BackendCore::new("run");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        core.set_callbacks(BackendCallbacks {
            on_state_change: Some(Arc::new(move |state| sink.lock().push(state))),
            ..Default::default()
        });

        core.set_state(WorkerState::Starting);
        core.set_state(WorkerState::Starting);
        core.set_state(WorkerState::Running);

        assert_eq!(
            *seen.lock(),
            vec![WorkerState::Starting, WorkerState::Running]
        );
    }

    #[test]
    fn test_cleared_callbacks_are_silent() {
        let core = BackendCore::new("run");
        let frames = Arc::new(Mutex::new(0usize));
        let sink = frames.clone();
        core.set_callbacks(BackendCallbacks {
            on_image: Some(Arc::new(move |_| *sink.lock() += 1)),
            ..Default::default()
        });

        core.emit_image(vec![1]);
        core.clear_callbacks();
        core.emit_image(vec![2]);

        assert_eq!(*frames.lock(), 1);
    }
}
