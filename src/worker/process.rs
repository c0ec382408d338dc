//! # Process Backend
//!
//! Runs the worker command through `sh -c`. Every stderr line becomes a log callback and
//! stdout is treated as an MJPEG byte stream split into frames on the JPEG start/end
//! markers. An exit that was not requested through [`StreamingBackend::stop`] moves the
//! backend to `Idle`, which the watchdog reports as unhealthy.

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::backend::{BackendCallbacks, BackendCore, BackendOutcome, StreamingBackend};
use super::state::WorkerState;
use crate::constants::backends;
use crate::messaging::LogLevel;

const START_OF_IMAGE: [u8; 2] = [0xFF, 0xD8];
const END_OF_IMAGE: [u8; 2] = [0xFF, 0xD9];

/// Frames larger than this are discarded as corrupt
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Incremental splitter for concatenated JPEG frames
#[derive(Debug)]
pub struct FrameSplitter {
    buffer: Vec<u8>,
    max_frame_bytes: usize,
}

impl FrameSplitter {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_bytes,
        }
    }

    /// Feed a chunk and return every frame it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            let Some(start) = find_marker(&self.buffer, START_OF_IMAGE, 0) else {
                // A trailing 0xFF may be the first half of the next marker
                let keep_tail = self.buffer.last() == Some(&0xFF);
                self.buffer.clear();
                if keep_tail {
                    self.buffer.push(0xFF);
                }
                break;
            };
            if start > 0 {
                self.buffer.drain(..start);
            }

            match find_marker(&self.buffer, END_OF_IMAGE, START_OF_IMAGE.len()) {
                Some(end) => {
                    frames.push(self.buffer.drain(..end + END_OF_IMAGE.len()).collect());
                }
                None => {
                    if self.buffer.len() > self.max_frame_bytes {
                        self.buffer.clear();
                    }
                    break;
                }
            }
        }

        frames
    }

    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }
}

fn find_marker(haystack: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|window| window == marker)
        .map(|position| position + from)
}

/// Wait for the pipe readers; a grandchild holding a pipe open must not block shutdown
async fn drain_readers(readers: impl Iterator<Item = JoinHandle<()>>) {
    for reader in readers {
        let _ = tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await;
    }
}

#[derive(Debug)]
struct ProcessRun {
    stop: CancellationToken,
    monitor: JoinHandle<()>,
}

#[derive(Debug)]
pub struct ProcessBackend {
    worker_id: Uuid,
    core: Arc<BackendCore>,
    run: Mutex<Option<ProcessRun>>,
}

impl ProcessBackend {
    pub fn new(worker_id: Uuid, command: impl Into<String>) -> Self {
        Self {
            worker_id,
            core: Arc::new(BackendCore::new(command)),
            run: Mutex::new(None),
        }
    }

    async fn read_logs<R: AsyncRead + Unpin>(core: Arc<BackendCore>, stderr: R) {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if !line.trim().is_empty() {
                core.emit_log(LogLevel::Info, line);
            }
        }
    }

    async fn read_frames<R: AsyncRead + Unpin>(core: Arc<BackendCore>, mut stdout: R) {
        let mut splitter = FrameSplitter::new(MAX_FRAME_BYTES);
        let mut chunk = vec![0u8; 64 * 1024];
        loop {
            match stdout.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(read) => {
                    for frame in splitter.push(&chunk[..read]) {
                        core.emit_image(frame);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl StreamingBackend for ProcessBackend {
    fn name(&self) -> &str {
        backends::PROCESS
    }

    async fn start(&self) -> BackendOutcome {
        let mut run = self.run.lock().await;
        if run.is_some() && self.core.state() == WorkerState::Running {
            return BackendOutcome::ok(WorkerState::Running, "already running");
        }

        self.core.set_state(WorkerState::Starting);
        let command_line = self.core.command();
        if command_line.trim().is_empty() {
            self.core.set_state(WorkerState::Idle);
            return BackendOutcome::failed(WorkerState::Idle, "no command configured");
        }

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(error) => {
                let message = format!("failed to launch '{command_line}': {error}");
                self.core.emit_log(LogLevel::Error, message.clone());
                self.core.set_state(WorkerState::Idle);
                return BackendOutcome::failed(WorkerState::Idle, message);
            }
        };

        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(Self::read_logs(self.core.clone(), stderr)));
        let stdout_task = child
            .stdout
            .take()
            .map(|stdout| tokio::spawn(Self::read_frames(self.core.clone(), stdout)));

        // Running before the monitor exists, so a fast exit cannot be overwritten
        self.core.set_state(WorkerState::Running);

        let stop = CancellationToken::new();
        let monitor = {
            let core = self.core.clone();
            let stop = stop.clone();
            let worker_id = self.worker_id;
            tokio::spawn(async move {
                let exit = tokio::select! {
                    status = child.wait() => Some(status),
                    _ = stop.cancelled() => None,
                };

                let readers = [stderr_task, stdout_task].into_iter().flatten();
                match exit {
                    Some(status) => {
                        drain_readers(readers).await;
                        let description = match status {
                            Ok(status) => status.to_string(),
                            Err(error) => error.to_string(),
                        };
                        warn!(worker_id = %worker_id, status = %description, "⚠️ Worker process exited");
                        core.emit_log(
                            LogLevel::Warning,
                            format!("process exited: {description}"),
                        );
                        core.set_state(WorkerState::Idle);
                    }
                    None => {
                        if let Err(error) = child.kill().await {
                            debug!(worker_id = %worker_id, error = %error, "Kill after stop request failed");
                        }
                        drain_readers(readers).await;
                    }
                }
            })
        };

        *run = Some(ProcessRun { stop, monitor });
        info!(worker_id = %self.worker_id, command = %command_line, "▶️ Worker process launched");
        BackendOutcome::ok(WorkerState::Running, "process launched")
    }

    async fn stop(&self) -> BackendOutcome {
        let mut run = self.run.lock().await;
        let Some(ProcessRun { stop, monitor }) = run.take() else {
            self.core.set_state(WorkerState::Idle);
            return BackendOutcome::ok(WorkerState::Idle, "already stopped");
        };

        if self.core.state() != WorkerState::Idle {
            self.core.set_state(WorkerState::Stopping);
        }
        stop.cancel();
        if let Err(error) = monitor.await {
            warn!(worker_id = %self.worker_id, error = %error, "Process monitor ended abnormally");
        }
        self.core.set_state(WorkerState::Idle);
        info!(worker_id = %self.worker_id, "⏹️ Worker process stopped");
        BackendOutcome::ok(WorkerState::Idle, "process stopped")
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

    #[test]
    fn test_splitter_handles_split_markers() {
        let mut splitter = FrameSplitter::new(MAX_FRAME_BYTES);
        assert!(splitter.push(&[0x00, 0xFF]).is_empty());
        assert!(splitter.push(&[0xD8, 0x01, 0x02, 0xFF]).is_empty());
        let frames = splitter.push(&[0xD9, 0xFF, 0xD8, 0x03]);

        assert_eq!(frames, vec![vec![0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9]]);
        assert_eq!(splitter.pending_bytes(), 3);
    }

    #[test]
    fn test_splitter_emits_multiple_frames_per_chunk() {
        let mut splitter = FrameSplitter::new(MAX_FRAME_BYTES);
        let frames = splitter.push(&[0xFF, 0xD8, 0xAA, 0xFF, 0xD9, 0xFF, 0xD8, 0xBB, 0xFF, 0xD9]);
        assert_eq!(frames.len(), 2);
        assert_eq!(splitter.pending_bytes(), 0);
    }

    #[test]
    fn test_splitter_drops_oversized_frame() {
        let mut splitter = FrameSplitter::new(4);
        assert!(splitter.push(&[0xFF, 0xD8, 1, 2, 3, 4]).is_empty());
        assert_eq!(splitter.pending_bytes(), 0);
    }

    #[tokio::test]
    async fn test_process_logs_frames_and_exit() {
        let backend = ProcessBackend::new(
            Uuid::new_v4(),
            r"echo starting >&2; printf '\377\330\001\377\331'",
        );
        let logs = Arc::new(SyncMutex::new(Vec::new()));
        let frames = Arc::new(SyncMutex::new(Vec::new()));
        let (log_sink, frame_sink) = (logs.clone(), frames.clone());
        backend.set_callbacks(BackendCallbacks {
            on_log: Some(Arc::new(move |_, line| log_sink.lock().push(line))),
            on_image: Some(Arc::new(move |frame| frame_sink.lock().push(frame))),
            on_state_change: None,
        });

        assert!(backend.start().await.success);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while backend.state() != WorkerState::Idle && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(backend.state(), WorkerState::Idle);
        assert!(logs.lock().iter().any(|line| line == "starting"));
        assert_eq!(*frames.lock(), vec![vec![0xFF, 0xD8, 0x01, 0xFF, 0xD9]]);
        assert!(backend.stop().await.success);
    }

    #[tokio::test]
    async fn test_stop_kills_long_running_process() {
        let backend = ProcessBackend::new(Uuid::new_v4(), "sleep 30");
        assert!(backend.start().await.success);
        assert_eq!(backend.state(), WorkerState::Running);

        let outcome = tokio::time::timeout(Duration::from_secs(5), backend.stop())
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(backend.state(), WorkerState::Idle);
    }

    #[tokio::test]
    async fn test_empty_command_fails_start() {
        let backend = ProcessBackend::new(Uuid::new_v4(), "  ");
        let outcome = backend.start().await;
        assert!(!outcome.success);
        assert_eq!(backend.state(), WorkerState::Idle);
    }
}
