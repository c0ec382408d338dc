use async_trait::async_trait;
use engine_gateway::worker::{
    BackendCallbacks, BackendCore, BackendOutcome, StreamingBackend, WorkerState,
};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Backend whose state is set by the test; start and stop only count calls unless scripted
#[derive(Debug)]
pub struct ScriptedBackend {
    core: BackendCore,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    state_after_start: parking_lot::Mutex<WorkerState>,
}

impl ScriptedBackend {
    pub fn new(initial: WorkerState) -> Self {
        let core = BackendCore::new("scripted");
        core.set_state(initial);
        Self {
            core,
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            state_after_start: parking_lot::Mutex::new(WorkerState::Running),
        }
    }

    /// State reported after `start` returns
    pub fn settle_start_in(&self, state: WorkerState) {
        *self.state_after_start.lock() = state;
    }

    /// Change the reported state, firing the state-change callback
    pub fn force_state(&self, state: WorkerState) {
        self.core.set_state(state);
    }

    pub fn emit_frame(&self) {
        self.core.emit_image(vec![0xFF, 0xD8, 0xFF, 0xD9]);
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamingBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn start(&self) -> BackendOutcome {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let state = *self.state_after_start.lock();
        self.core.set_state(state);
        BackendOutcome::ok(state, "scripted start")
    }

    async fn stop(&self) -> BackendOutcome {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.core.set_state(WorkerState::Idle);
        BackendOutcome::ok(WorkerState::Idle, "scripted stop")
    }

    fn state(&self) -> WorkerState {
        self.core.state()
    }

    fn command(&self) -> String {
        self.core.command()
    }

    fn set_command(&self, command: String) {
        self.core.set_command(command);
    }

    fn set_callbacks(&self, callbacks: BackendCallbacks) {
        self.core.set_callbacks(callbacks);
    }

    fn clear_callbacks(&self) {
        self.core.clear_callbacks();
    }
}
