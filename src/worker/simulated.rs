//! # Simulated Backend
//!
//! Timer-driven backend that produces synthetic JPEG-framed buffers and periodic log lines.
//! It can be told to stall (keep reporting `Running` while emitting no frames), to crash,
//! or to fail its next start/stop, which makes it the reference backend for exercising
//! watchdog behaviour without an external process.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::backend::{BackendCallbacks, BackendCore, BackendOutcome, StreamingBackend};
use super::state::WorkerState;
use crate::constants::backends;
use crate::messaging::LogLevel;

#[derive(Debug, Clone)]
pub struct SimulatedSettings {
    pub frame_interval: Duration,
    pub log_interval: Duration,
    pub startup_delay: Duration,
}

impl Default for SimulatedSettings {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(100),
            log_interval: Duration::from_secs(1),
            startup_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug)]
pub struct SimulatedBackend {
    worker_id: Uuid,
    core: Arc<BackendCore>,
    settings: SimulatedSettings,
    stalled: Arc<AtomicBool>,
    fail_next_start: AtomicBool,
    fail_next_stop: AtomicBool,
    start_calls: AtomicU64,
    stop_calls: AtomicU64,
    run: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl SimulatedBackend {
    pub fn new(worker_id: Uuid, command: impl Into<String>) -> Self {
        Self::with_settings(worker_id, command, SimulatedSettings::default())
    }

    pub fn with_settings(
        worker_id: Uuid,
        command: impl Into<String>,
        settings: SimulatedSettings,
    ) -> Self {
        Self {
            worker_id,
            core: Arc::new(BackendCore::new(command)),
            settings,
            stalled: Arc::new(AtomicBool::new(false)),
            fail_next_start: AtomicBool::new(false),
            fail_next_stop: AtomicBool::new(false),
            start_calls: AtomicU64::new(0),
            stop_calls: AtomicU64::new(0),
            run: Mutex::new(None),
        }
    }

    /// Stop emitting frames while still reporting `Running`
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    pub fn fail_next_start(&self) {
        self.fail_next_start.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_stop(&self) {
        self.fail_next_stop.store(true, Ordering::SeqCst);
    }

    pub fn start_calls(&self) -> u64 {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> u64 {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// Terminate production as if the producer died on its own
    pub async fn crash(&self) {
        if let Some((token, handle)) = self.run.lock().await.take() {
            token.cancel();
            let _ = handle.await;
        }
        self.core.emit_log(LogLevel::Error, "simulated producer exited unexpectedly");
        self.core.set_state(WorkerState::Idle);
    }

    async fn produce(
        core: Arc<BackendCore>,
        settings: SimulatedSettings,
        stalled: Arc<AtomicBool>,
        cancel: CancellationToken,
    ) {
        let mut frames = tokio::time::interval(settings.frame_interval);
        let mut logs = tokio::time::interval(settings.log_interval);
        let mut frame_number: u64 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = frames.tick() => {
                    if stalled.load(Ordering::SeqCst) {
                        continue;
                    }
                    frame_number += 1;
                    core.emit_image(synthetic_frame(frame_number));
                }
                _ = logs.tick() => {
                    core.emit_log(
                        LogLevel::Info,
                        format!("frame={frame_number} command=\"{}\"", core.command()),
                    );
                }
            }
        }
    }
}

/// SOI marker, frame counter, EOI marker
fn synthetic_frame(frame_number: u64) -> Vec<u8> {
    let mut frame = Vec::with_capacity(12);
    frame.extend_from_slice(&[0xFF, 0xD8]);
    frame.extend_from_slice(&frame_number.to_be_bytes());
    frame.extend_from_slice(&[0xFF, 0xD9]);
    frame
}

#[async_trait]
impl StreamingBackend for SimulatedBackend {
    fn name(&self) -> &str {
        backends::SIMULATED
    }

    async fn start(&self) -> BackendOutcome {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let mut run = self.run.lock().await;

        if run.is_some() && self.core.state() == WorkerState::Running {
            return BackendOutcome::ok(WorkerState::Running, "already running");
        }

        self.core.set_state(WorkerState::Starting);
        if !self.settings.startup_delay.is_zero() {
            tokio::time::sleep(self.settings.startup_delay).await;
        }

        if self.fail_next_start.swap(false, Ordering::SeqCst) {
            self.core
                .emit_log(LogLevel::Error, "simulated producer failed to start");
            self.core.set_state(WorkerState::Idle);
            return BackendOutcome::failed(WorkerState::Idle, "simulated start failure");
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Self::produce(
            self.core.clone(),
            self.settings.clone(),
            self.stalled.clone(),
            cancel.clone(),
        ));
        *run = Some((cancel, handle));

        self.core.set_state(WorkerState::Running);
        info!(worker_id = %self.worker_id, "▶️ Simulated backend running");
        BackendOutcome::ok(WorkerState::Running, "started")
    }

    async fn stop(&self) -> BackendOutcome {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_next_stop.swap(false, Ordering::SeqCst) {
            return BackendOutcome::failed(self.core.state(), "simulated stop failure");
        }

        let mut run = self.run.lock().await;
        let Some((cancel, handle)) = run.take() else {
            self.core.set_state(WorkerState::Idle);
            return BackendOutcome::ok(WorkerState::Idle, "already stopped");
        };

        self.core.set_state(WorkerState::Stopping);
        cancel.cancel();
        if let Err(e) = handle.await {
            debug!(worker_id = %self.worker_id, error = %e, "Producer task ended abnormally");
        }
        self.core.set_state(WorkerState::Idle);
        info!(worker_id = %self.worker_id, "⏹️ Simulated backend stopped");
        BackendOutcome::ok(WorkerState::Idle, "stopped")
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

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;

    fn fast_settings() -> SimulatedSettings {
        SimulatedSettings {
            frame_interval: Duration::from_millis(10),
            log_interval: Duration::from_millis(50),
            startup_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_start_produces_frames_and_stop_goes_idle() {
        let backend = SimulatedBackend::with_settings(Uuid::new_v4(), "sim", fast_settings());
        let frames = Arc::new(SyncMutex::new(Vec::<Vec<u8>>::new()));
        let sink = frames.clone();
        backend.set_callbacks(BackendCallbacks {
            on_image: Some(Arc::new(move |frame| sink.lock().push(frame))),
            ..Default::default()
        });

        let outcome = backend.start().await;
        assert!(outcome.success);
        assert_eq!(backend.state(), WorkerState::Running);

        tokio::time::sleep(Duration::from_millis(60)).await;
        let outcome = backend.stop().await;
        assert!(outcome.success);
        assert_eq!(backend.state(), WorkerState::Idle);

        let frames = frames.lock();
        assert!(!frames.is_empty());
        assert_eq!(&frames[0][..2], &[0xFF, 0xD8]);
        assert_eq!(&frames[0][frames[0].len() - 2..], &[0xFF, 0xD9]);
    }

    #[tokio::test]
    async fn test_failed_start_reports_idle() {
        let backend = SimulatedBackend::with_settings(Uuid::new_v4(), "sim", fast_settings());
        backend.fail_next_start();

        let outcome = backend.start().await;
        assert!(!outcome.success);
        assert_eq!(outcome.state, WorkerState::Idle);
        assert_eq!(backend.state(), WorkerState::Idle);

        assert!(backend.start().await.success);
        assert_eq!(backend.start_calls(), 2);
        backend.stop().await;
    }

    #[tokio::test]
    async fn test_state_changes_are_reported() {
        let backend = SimulatedBackend::with_settings(Uuid::new_v4(), "sim", fast_settings());
        let states = Arc::new(SyncMutex::new(Vec::new()));
        let sink = states.clone();
        backend.set_callbacks(BackendCallbacks {
            on_state_change: Some(Arc::new(move |state| sink.lock().push(state))),
            ..Default::default()
        });

        backend.start().await;
        backend.crash().await;

        assert_eq!(
            *states.lock(),
            vec![
                WorkerState::Starting,
                WorkerState::Running,
                WorkerState::Idle
            ]
        );
    }
}
