//! JSON-lines TCP transport for hub sessions.
//!
//! Each line is one [`Frame`]. The engine sends `invoke` frames and the hub answers each with
//! an `invoke_result` carrying the same id; the hub sends `command` frames and the engine
//! answers with `command_result`. URLs take the form `tcp://host:port`.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::transport::{HubConnector, HubSession, InvokeError};
use crate::commands::{CommandHandler, CommandResult};

const TCP_SCHEME: &str = "tcp://";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Invoke {
        id: u64,
        method: String,
        payload: Value,
    },
    InvokeResult {
        id: u64,
        #[serde(default)]
        method_not_found: bool,
    },
    Command {
        id: u64,
        name: String,
        #[serde(default)]
        payload: Value,
    },
    CommandResult {
        id: u64,
        result: CommandResult,
    },
}

#[derive(Debug, Clone)]
pub struct TcpHubConnector {
    connect_timeout: Duration,
    invoke_timeout: Duration,
}

impl TcpHubConnector {
    pub fn new(connect_timeout: Duration, invoke_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            invoke_timeout,
        }
    }
}

impl Default for TcpHubConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(30))
    }
}

#[async_trait]
impl HubConnector for TcpHubConnector {
    async fn connect(
        &self,
        url: &str,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<Box<dyn HubSession>, InvokeError> {
        let address = url
            .strip_prefix(TCP_SCHEME)
            .map(|rest| rest.trim_end_matches('/'))
            .ok_or_else(|| InvokeError::transport(format!("unsupported hub URL '{url}'")))?;

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| InvokeError::transport(format!("connect to {address} timed out")))?
            .map_err(|e| InvokeError::transport(format!("connect to {address} failed: {e}")))?;
        let _ = stream.set_nodelay(true);

        info!(hub_url = %url, "🔗 TCP hub connection established");
        Ok(Box::new(TcpHubSession::spawn(
            stream,
            handler,
            self.invoke_timeout,
        )))
    }
}

/// In-flight invokes by id, with the method each one targets
type PendingInvokes = DashMap<u64, (String, oneshot::Sender<Result<(), InvokeError>>)>;

pub struct TcpHubSession {
    writer: Arc<Mutex<OwnedWriteHalf>>,
    pending: Arc<PendingInvokes>,
    next_id: AtomicU64,
    closed: CancellationToken,
    reader: JoinHandle<()>,
    invoke_timeout: Duration,
}

impl TcpHubSession {
    fn spawn(stream: TcpStream, handler: Arc<dyn CommandHandler>, invoke_timeout: Duration) -> Self {
        let (read_half, write_half) = stream.into_split();
        let writer = Arc::new(Mutex::new(write_half));
        let pending: Arc<PendingInvokes> = Arc::new(DashMap::new());
        let closed = CancellationToken::new();

        let reader = tokio::spawn(read_loop(
            read_half,
            writer.clone(),
            pending.clone(),
            handler,
            closed.clone(),
        ));

        Self {
            writer,
            pending,
            next_id: AtomicU64::new(1),
            closed,
            reader,
            invoke_timeout,
        }
    }
}

#[async_trait]
impl HubSession for TcpHubSession {
    async fn invoke(&self, method: &str, payload: Value) -> Result<(), InvokeError> {
        if self.closed.is_cancelled() {
            return Err(InvokeError::transport("connection closed"));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, (method.to_string(), tx));

        let frame = Frame::Invoke {
            id,
            method: method.to_string(),
            payload,
        };
        if let Err(e) = write_frame(&self.writer, &frame).await {
            self.pending.remove(&id);
            self.closed.cancel();
            return Err(e);
        }

        match tokio::time::timeout(self.invoke_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(InvokeError::transport("connection closed")),
            Err(_) => {
                self.pending.remove(&id);
                Err(InvokeError::transport(format!("invoke of {method} timed out")))
            }
        }
    }

    async fn closed(&self) {
        self.closed.cancelled().await;
    }

    async fn close(&self) {
        self.closed.cancel();
        let _ = self.writer.lock().await.shutdown().await;
        self.reader.abort();
    }
}

impl Drop for TcpHubSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(
    read_half: OwnedReadHalf,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    pending: Arc<PendingInvokes>,
    handler: Arc<dyn CommandHandler>,
    closed: CancellationToken,
) {
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = tokio::select! {
            _ = closed.cancelled() => break,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("Hub closed the connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Error reading from hub connection");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Frame>(&line) {
            Ok(Frame::InvokeResult {
                id,
                method_not_found,
            }) => {
                if let Some((_, (method, tx))) = pending.remove(&id) {
                    let result = if method_not_found {
                        Err(InvokeError::method_not_found(method))
                    } else {
                        Ok(())
                    };
                    let _ = tx.send(result);
                }
            }
            Ok(Frame::Command { id, name, payload }) => {
                let handler = handler.clone();
                let writer = writer.clone();
                tokio::spawn(async move {
                    let result = handler.handle_command(&name, payload).await;
                    if let Err(e) = write_frame(&writer, &Frame::CommandResult { id, result }).await {
                        warn!(command = %name, error = %e, "Failed to send command result");
                    }
                });
            }
            Ok(other) => {
                warn!(frame = ?other, "Unexpected frame from hub");
            }
            Err(e) => {
                warn!(error = %e, "Failed to parse hub frame");
            }
        }
    }

    closed.cancel();
    let stranded: Vec<u64> = pending.iter().map(|entry| *entry.key()).collect();
    for id in stranded {
        if let Some((_, (_, tx))) = pending.remove(&id) {
            let _ = tx.send(Err(InvokeError::transport("connection closed")));
        }
    }
}

async fn write_frame(writer: &Mutex<OwnedWriteHalf>, frame: &Frame) -> Result<(), InvokeError> {
    let mut line = serde_json::to_string(frame)
        .map_err(|e| InvokeError::transport(format!("failed to encode frame: {e}")))?;
    line.push('\n');

    let mut writer = writer.lock().await;
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| InvokeError::transport(format!("write failed: {e}")))
}
