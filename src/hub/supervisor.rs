//! # Connection Supervisor
//!
//! Keeps exactly one logical session to one hub URL alive regardless of transport churn.
//!
//! ```text
//! Disconnected ──▶ Connecting ──▶ Connected
//!       ▲               │              │
//!       └── backoff ◀───┴── close/err ◀┘
//! ```
//!
//! On every successful connect the supervisor records a sync timestamp, sends the engine
//! handshake and a full worker snapshot, then drains its own [`MultiQueue`]. Buffered
//! `WorkerEvent`s older than the sync timestamp are discarded since the snapshot supersedes
//! them. Every invoke carries a per-connection sequence number that is independent of the
//! global one. Messages the supervisor creates itself (handshake, snapshot, dead letters) are
//! stamped from a per-supervisor counter and never consume global sequence numbers.
//!
//! Delivery is at-most-once: a message whose invoke fails at the transport level is not
//! retried. A message the peer has no method for is rerouted as a dead letter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::routing::method_for;
use super::transport::{HubConnector, HubSession, InvokeError};
use crate::commands::CommandHandler;
use crate::config::GatewayConfig;
use crate::constants::{methods, DEFAULT_QUEUE_CAPACITY, DEFAULT_RECONNECT_DELAY};
use crate::logging::log_hub_operation;
use crate::messaging::{
    ConnectionEnvelope, DeadLetterPayload, Enricher, Envelope, MessageKind, MessagePayload,
    MultiQueue, SequenceCounter, SystemInfoPayload, WorkerEventPayload,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Source of the state a freshly connected peer needs
#[async_trait]
pub trait SessionSync: Send + Sync {
    /// Engine identity sent as the handshake
    async fn engine_info(&self) -> SystemInfoPayload;

    /// Current state of every worker
    async fn worker_snapshot(&self) -> Vec<WorkerEventPayload>;
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub reconnect_delay: Duration,
    pub queue_capacity: usize,
}

impl SupervisorSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            reconnect_delay: config.hubs.reconnect_delay(),
            queue_capacity: config.hubs.peer_queue_capacity,
        }
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Default)]
struct SupervisorStats {
    connection_attempts: AtomicU64,
    connections: AtomicU64,
    delivered: AtomicU64,
    stale_discarded: AtomicU64,
    dead_lettered: AtomicU64,
    transport_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SupervisorStatsSnapshot {
    pub connection_attempts: u64,
    pub connections: u64,
    pub delivered: u64,
    pub stale_discarded: u64,
    pub dead_lettered: u64,
    pub transport_failures: u64,
}

/// Why a session stopped being served
enum SessionEnd {
    Cancelled,
    Lost(String),
}

pub struct ConnectionSupervisor {
    url: String,
    connector: Arc<dyn HubConnector>,
    handler: Arc<dyn CommandHandler>,
    sync: Arc<dyn SessionSync>,
    /// Stamps handshake, snapshot and dead-letter messages without touching the global counter
    session_enricher: Enricher,
    queue: MultiQueue,
    connection_sequence: SequenceCounter,
    sync_timestamp: RwLock<Option<DateTime<Utc>>>,
    state: watch::Sender<ConnectionState>,
    reconnect_delay: Duration,
    stats: SupervisorStats,
}

impl ConnectionSupervisor {
    pub fn new(
        url: impl Into<String>,
        connector: Arc<dyn HubConnector>,
        handler: Arc<dyn CommandHandler>,
        sync: Arc<dyn SessionSync>,
        enricher: Enricher,
        settings: SupervisorSettings,
    ) -> Self {
        let url = url.into();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            queue: MultiQueue::new(format!("peer:{url}"), settings.queue_capacity),
            url,
            connector,
            handler,
            sync,
            session_enricher: Enricher::with_counter(
                enricher.engine_id(),
                Arc::new(SequenceCounter::new()),
            ),
            connection_sequence: SequenceCounter::new(),
            sync_timestamp: RwLock::new(None),
            state,
            reconnect_delay: settings.reconnect_delay,
            stats: SupervisorStats::default(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Peer queue; only the fan-out step enqueues into it
    pub fn queue(&self) -> &MultiQueue {
        &self.queue
    }

    /// Timestamp of the most recent successful handshake
    pub fn sync_timestamp(&self) -> Option<DateTime<Utc>> {
        *self.sync_timestamp.read()
    }

    /// Hand a message from the global queue to this peer
    pub fn offer(&self, message: Arc<Envelope>) {
        self.queue.enqueue_envelope(message);
    }

    pub fn stats(&self) -> SupervisorStatsSnapshot {
        SupervisorStatsSnapshot {
            connection_attempts: self.stats.connection_attempts.load(Ordering::Relaxed),
            connections: self.stats.connections.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            stale_discarded: self.stats.stale_discarded.load(Ordering::Relaxed),
            dead_lettered: self.stats.dead_lettered.load(Ordering::Relaxed),
            transport_failures: self.stats.transport_failures.load(Ordering::Relaxed),
        }
    }

    /// Connect, serve and reconnect until `cancel` fires
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(hub_url = %self.url, "📡 Connection supervisor started");

        while !cancel.is_cancelled() {
            self.set_state(ConnectionState::Connecting);
            self.stats.connection_attempts.fetch_add(1, Ordering::Relaxed);

            let connected = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.connector.connect(&self.url, self.handler.clone()) => result,
            };

            match connected {
                Ok(session) => {
                    self.stats.connections.fetch_add(1, Ordering::Relaxed);
                    self.set_state(ConnectionState::Connected);
                    log_hub_operation("connect", &self.url, "connected", None);

                    let end = self.serve(session.as_ref(), &cancel).await;
                    session.close().await;
                    self.set_state(ConnectionState::Disconnected);

                    match end {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Lost(reason) => {
                            warn!(hub_url = %self.url, reason = %reason, "🔌 Hub session lost");
                        }
                    }
                }
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    warn!(hub_url = %self.url, error = %e, "🔌 Hub connection failed");
                }
            }

            debug!(
                hub_url = %self.url,
                delay_ms = self.reconnect_delay.as_millis() as u64,
                "Waiting before reconnect"
            );
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        self.set_state(ConnectionState::Disconnected);
        log_hub_operation("disconnect", &self.url, "stopped", None);
    }

    async fn serve(&self, session: &dyn HubSession, cancel: &CancellationToken) -> SessionEnd {
        let sync_timestamp = Utc::now();
        *self.sync_timestamp.write() = Some(sync_timestamp);

        let handshake = self
            .session_enricher
            .enrich(MessagePayload::SystemInfo(self.sync.engine_info().await));
        if let Err(reason) = self.deliver(session, &handshake).await {
            return SessionEnd::Lost(reason);
        }

        let snapshot = self.sync.worker_snapshot().await;
        let snapshot_len = snapshot.len();
        for event in snapshot {
            let envelope = self.session_enricher.enrich(MessagePayload::WorkerEvent(event));
            if let Err(reason) = self.deliver(session, &envelope).await {
                return SessionEnd::Lost(reason);
            }
        }
        debug!(hub_url = %self.url, workers = snapshot_len, "Worker snapshot sent");

        loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => return SessionEnd::Cancelled,
                _ = session.closed() => return SessionEnd::Lost("closed by peer".to_string()),
                message = self.queue.dequeue(cancel) => message,
            };
            let Some(message) = message else {
                return SessionEnd::Cancelled;
            };

            if is_stale(&message, sync_timestamp) {
                self.stats.stale_discarded.fetch_add(1, Ordering::Relaxed);
                debug!(
                    hub_url = %self.url,
                    sequence = message.sequence_number(),
                    "Discarding worker event older than the last sync"
                );
                continue;
            }

            if let Err(reason) = self.deliver(session, &message).await {
                return SessionEnd::Lost(reason);
            }
        }
    }

    /// Invoke the mapped method; `Err` means the transport is gone
    async fn deliver(&self, session: &dyn HubSession, envelope: &Envelope) -> Result<(), String> {
        let method = method_for(envelope);
        match self.invoke(session, method, envelope).await {
            Ok(()) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(InvokeError::MethodNotFound { method }) => {
                self.dead_letter(session, envelope, method).await
            }
            Err(InvokeError::Transport(reason)) => {
                self.stats.transport_failures.fetch_add(1, Ordering::Relaxed);
                Err(reason)
            }
        }
    }

    async fn dead_letter(
        &self,
        session: &dyn HubSession,
        original: &Envelope,
        method: String,
    ) -> Result<(), String> {
        if original.kind() == MessageKind::DeadLetter {
            warn!(hub_url = %self.url, "Peer rejected dead letter, dropping it");
            return Ok(());
        }

        info!(
            hub_url = %self.url,
            method = %method,
            kind = %original.kind(),
            "📮 Peer lacks method, sending dead letter"
        );
        let dead_letter = self
            .session_enricher
            .enrich(MessagePayload::DeadLetter(DeadLetterPayload {
                original_kind: original.kind(),
                source_engine_id: original.engine_id(),
                original_timestamp: original.timestamp(),
                original_sequence: original.sequence_number(),
                reason: format!("Peer does not implement method '{method}'"),
                method,
            }));

        match self
            .invoke(session, methods::RECEIVE_DEAD_LETTER, &dead_letter)
            .await
        {
            Ok(()) => {
                self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(InvokeError::MethodNotFound { .. }) => {
                warn!(hub_url = %self.url, "Peer has no dead-letter method, message dropped");
                Ok(())
            }
            Err(InvokeError::Transport(reason)) => {
                self.stats.transport_failures.fetch_add(1, Ordering::Relaxed);
                Err(reason)
            }
        }
    }

    async fn invoke(
        &self,
        session: &dyn HubSession,
        method: &str,
        envelope: &Envelope,
    ) -> Result<(), InvokeError> {
        let payload = match self.wire_payload(envelope) {
            Some(payload) => payload,
            None => return Ok(()),
        };
        session.invoke(method, payload).await
    }

    fn wire_payload(&self, envelope: &Envelope) -> Option<Value> {
        let wire = ConnectionEnvelope::new(self.connection_sequence.next_value(), envelope);
        match serde_json::to_value(&wire) {
            Ok(payload) => Some(payload),
            Err(e) => {
                error!(
                    hub_url = %self.url,
                    kind = %envelope.kind(),
                    error = %e,
                    "Failed to serialize envelope, message dropped"
                );
                None
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

fn is_stale(message: &Envelope, sync_timestamp: DateTime<Utc>) -> bool {
    matches!(message.payload(), MessagePayload::WorkerEvent(_))
        && message.timestamp() < sync_timestamp
}

impl fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("url", &self.url)
            .field("state", &self.state())
            .field("queued", &self.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandResult;
    use crate::messaging::MetricPayload;
    use crate::worker::{EventType, WorkerState};
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use tokio::sync::Notify;
    use uuid::Uuid;

    #[derive(Debug, Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, Value)>>,
        missing_methods: Mutex<Vec<String>>,
    }

    #[derive(Debug, Clone, Default)]
    struct TestConnector {
        recorder: Arc<Recorder>,
    }

    struct TestSession {
        recorder: Arc<Recorder>,
        closed: Arc<Notify>,
    }

    #[async_trait]
    impl HubConnector for TestConnector {
        async fn connect(
            &self,
            _url: &str,
            _handler: Arc<dyn CommandHandler>,
        ) -> Result<Box<dyn HubSession>, InvokeError> {
            Ok(Box::new(TestSession {
                recorder: self.recorder.clone(),
                closed: Arc::new(Notify::new()),
            }))
        }
    }

    #[async_trait]
    impl HubSession for TestSession {
        async fn invoke(&self, method: &str, payload: Value) -> Result<(), InvokeError> {
            if self.recorder.missing_methods.lock().iter().any(|m| m == method) {
                return Err(InvokeError::method_not_found(method));
            }
            self.recorder.calls.lock().push((method.to_string(), payload));
            Ok(())
        }

        async fn closed(&self) {
            self.closed.notified().await;
        }

        async fn close(&self) {}
    }

    struct NoopHandler;

    #[async_trait]
    impl CommandHandler for NoopHandler {
        async fn handle_command(&self, _name: &str, _payload: Value) -> CommandResult {
            CommandResult::ok("noop")
        }
    }

    struct FixedSync {
        workers: Vec<WorkerEventPayload>,
    }

    #[async_trait]
    impl SessionSync for FixedSync {
        async fn engine_info(&self) -> SystemInfoPayload {
            SystemInfoPayload {
                engine_name: "engine".to_string(),
                description: String::new(),
                version: "test".to_string(),
                os: "linux".to_string(),
                arch: "x86_64".to_string(),
                started_at: Utc::now(),
                worker_count: self.workers.len(),
            }
        }

        async fn worker_snapshot(&self) -> Vec<WorkerEventPayload> {
            self.workers.clone()
        }
    }

    fn worker_event() -> WorkerEventPayload {
        WorkerEventPayload {
            worker_id: Uuid::new_v4(),
            name: "cam-1".to_string(),
            description: String::new(),
            command: "sim".to_string(),
            enabled: true,
            state: WorkerState::Running,
            event_type: EventType::Updated,
            watchdog_event_count: 0,
        }
    }

    fn supervisor(recorder: Arc<Recorder>) -> (Arc<ConnectionSupervisor>, Enricher) {
        let enricher = Enricher::new(Uuid::new_v4());
        let supervisor = ConnectionSupervisor::new(
            "ws://hub.local/engine",
            Arc::new(TestConnector { recorder }),
            Arc::new(NoopHandler),
            Arc::new(FixedSync {
                workers: vec![worker_event()],
            }),
            enricher.clone(),
            SupervisorSettings::default(),
        );
        (Arc::new(supervisor), enricher)
    }

    fn metric(enricher: &Enricher) -> Arc<Envelope> {
        let mut metrics = BTreeMap::new();
        metrics.insert("cpu".to_string(), 50.0);
        Arc::new(enricher.enrich(MessagePayload::Metric(MetricPayload {
            worker_id: None,
            metrics,
        })))
    }

    #[tokio::test]
    async fn test_handshake_snapshot_then_drain() {
        let recorder = Arc::new(Recorder::default());
        let (supervisor, enricher) = supervisor(recorder.clone());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervisor.clone().run(cancel.clone()));

        supervisor.offer(metric(&enricher));
        tokio::time::sleep(Duration::from_millis(100)).await;

        {
            let calls = recorder.calls.lock();
            let methods: Vec<&str> = calls.iter().map(|(m, _)| m.as_str()).collect();
            assert_eq!(
                methods,
                vec!["ReceiveSystemInfo", "ReceiveWorkerEvent", "ReceiveMetric"]
            );
            let sequences: Vec<u64> = calls
                .iter()
                .map(|(_, p)| p["connection_sequence"].as_u64().unwrap())
                .collect();
            assert_eq!(sequences, vec![1, 2, 3]);
        }
        assert!(supervisor.is_connected());
        assert!(supervisor.sync_timestamp().is_some());

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_stale_worker_events_are_discarded() {
        let recorder = Arc::new(Recorder::default());
        let (supervisor, enricher) = supervisor(recorder.clone());
        let stale = Arc::new(enricher.enrich(MessagePayload::WorkerEvent(worker_event())));
        tokio::time::sleep(Duration::from_millis(5)).await;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervisor.clone().run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        supervisor.offer(stale);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(supervisor.stats().stale_discarded, 1);
        let worker_events = recorder
            .calls
            .lock()
            .iter()
            .filter(|(m, _)| m == "ReceiveWorkerEvent")
            .count();
        assert_eq!(worker_events, 1);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_method_becomes_dead_letter() {
        let recorder = Arc::new(Recorder::default());
        recorder
            .missing_methods
            .lock()
            .push("ReceiveMetric".to_string());
        let (supervisor, enricher) = supervisor(recorder.clone());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervisor.clone().run(cancel.clone()));

        let original = metric(&enricher);
        supervisor.offer(original.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;

        {
            let calls = recorder.calls.lock();
            let (method, payload) = calls.last().unwrap();
            assert_eq!(method, "ReceiveDeadLetter");
            assert_eq!(payload["payload"]["original_kind"], "metric");
            assert_eq!(payload["payload"]["method"], "ReceiveMetric");
            assert_eq!(
                payload["payload"]["original_sequence"].as_u64(),
                Some(original.sequence_number())
            );
        }
        assert_eq!(supervisor.stats().dead_lettered, 1);
        assert!(supervisor.is_connected());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_session_messages_leave_global_sequence_untouched() {
        let recorder = Arc::new(Recorder::default());
        recorder
            .missing_methods
            .lock()
            .push("ReceiveMetric".to_string());
        let (supervisor, enricher) = supervisor(recorder.clone());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervisor.clone().run(cancel.clone()));

        let original = metric(&enricher);
        assert_eq!(original.sequence_number(), 1);
        supervisor.offer(original);
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Handshake, snapshot entry and dead letter were all sent
        assert_eq!(recorder.calls.lock().len(), 3);
        assert_eq!(metric(&enricher).sequence_number(), 2);

        cancel.cancel();
        task.await.unwrap();
    }

    #[test]
    fn test_is_stale_only_applies_to_worker_events() {
        let enricher = Enricher::new(Uuid::new_v4());
        let event = enricher.enrich(MessagePayload::WorkerEvent(worker_event()));
        let later = event.timestamp() + chrono::Duration::seconds(1);
        assert!(is_stale(&event, later));
        assert!(!is_stale(&event, event.timestamp()));
        assert!(!is_stale(&metric(&enricher), later));
    }
}
