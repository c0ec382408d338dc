use async_trait::async_trait;
use engine_gateway::commands::{CommandHandler, CommandResult};
use engine_gateway::hub::{HubConnector, HubSession, InvokeError};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One invocation seen by the mock hub
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub session: usize,
    pub method: String,
    pub payload: Value,
}

impl RecordedCall {
    pub fn connection_sequence(&self) -> u64 {
        self.payload["connection_sequence"].as_u64().unwrap_or(0)
    }

    pub fn kind(&self) -> &str {
        self.payload["kind"].as_str().unwrap_or_default()
    }
}

/// Shared state behind [`MockConnector`]: recorded calls plus scripted failures
#[derive(Debug, Default)]
pub struct MockHub {
    calls: Mutex<Vec<RecordedCall>>,
    missing_methods: Mutex<Vec<String>>,
    refuse_connections: AtomicUsize,
    fail_invokes: AtomicUsize,
    connects: AtomicUsize,
    sessions: Mutex<Vec<CancellationToken>>,
}

impl MockHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.method == method)
            .cloned()
            .collect()
    }

    /// Answer every invoke of `method` with MethodNotFound
    pub fn reject_method(&self, method: &str) {
        self.missing_methods.lock().push(method.to_string());
    }

    /// Refuse the next `count` connection attempts
    pub fn refuse_next_connections(&self, count: usize) {
        self.refuse_connections.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` invokes with a transport error
    pub fn fail_next_invokes(&self, count: usize) {
        self.fail_invokes.store(count, Ordering::SeqCst);
    }

    /// Successful connections so far
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Close the most recent session from the hub side
    pub fn drop_connection(&self) {
        if let Some(token) = self.sessions.lock().last() {
            token.cancel();
        }
    }

    fn take_one(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[derive(Debug, Clone)]
pub struct MockConnector {
    pub hub: Arc<MockHub>,
}

impl MockConnector {
    pub fn new(hub: Arc<MockHub>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl HubConnector for MockConnector {
    async fn connect(
        &self,
        url: &str,
        _handler: Arc<dyn CommandHandler>,
    ) -> Result<Box<dyn HubSession>, InvokeError> {
        if MockHub::take_one(&self.hub.refuse_connections) {
            return Err(InvokeError::transport(format!("{url} refused connection")));
        }

        let token = CancellationToken::new();
        self.hub.sessions.lock().push(token.clone());
        let session = self.hub.connects.fetch_add(1, Ordering::SeqCst) + 1;

        Ok(Box::new(MockSession {
            hub: self.hub.clone(),
            session,
            closed: token,
        }))
    }
}

pub struct MockSession {
    hub: Arc<MockHub>,
    session: usize,
    closed: CancellationToken,
}

#[async_trait]
impl HubSession for MockSession {
    async fn invoke(&self, method: &str, payload: Value) -> Result<(), InvokeError> {
        if self.closed.is_cancelled() {
            return Err(InvokeError::transport("session closed"));
        }
        if MockHub::take_one(&self.hub.fail_invokes) {
            self.closed.cancel();
            return Err(InvokeError::transport("connection reset"));
        }
        if self.hub.missing_methods.lock().iter().any(|m| m == method) {
            return Err(InvokeError::method_not_found(method));
        }

        self.hub.calls.lock().push(RecordedCall {
            session: self.session,
            method: method.to_string(),
            payload,
        });
        Ok(())
    }

    async fn closed(&self) {
        self.closed.cancelled().await;
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}

/// Handler that acknowledges every command
pub struct AckHandler;

#[async_trait]
impl CommandHandler for AckHandler {
    async fn handle_command(&self, name: &str, _payload: Value) -> CommandResult {
        CommandResult::ok(format!("ack {name}"))
    }
}
