//! Connection supervisor behaviour against a scripted hub: resynchronisation on reconnect,
//! stale event filtering, dead letters and per-connection sequencing.

mod common;

use async_trait::async_trait;
use chrono::Utc;
use common::{wait_until, AckHandler, MockConnector, MockHub};
use engine_gateway::constants::methods;
use engine_gateway::hub::{ConnectionState, ConnectionSupervisor, SessionSync, SupervisorSettings};
use engine_gateway::messaging::{
    Enricher, MessagePayload, MetricPayload, SystemInfoPayload, WorkerEventPayload,
};
use engine_gateway::worker::{EventType, WorkerState};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct FixedSync {
    workers: Vec<WorkerEventPayload>,
}

#[async_trait]
impl SessionSync for FixedSync {
    async fn engine_info(&self) -> SystemInfoPayload {
        SystemInfoPayload {
            engine_name: "engine".to_string(),
            description: "integration".to_string(),
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

fn worker_event(name: &str) -> WorkerEventPayload {
    WorkerEventPayload {
        worker_id: Uuid::new_v4(),
        name: name.to_string(),
        description: String::new(),
        command: "sim".to_string(),
        enabled: true,
        state: WorkerState::Running,
        event_type: EventType::Updated,
        watchdog_event_count: 0,
    }
}

fn metric(value: f64) -> MessagePayload {
    let mut metrics = BTreeMap::new();
    metrics.insert("cpu".to_string(), value);
    MessagePayload::Metric(MetricPayload {
        worker_id: None,
        metrics,
    })
}

fn spawn_supervisor(
    hub: &Arc<MockHub>,
    enricher: Enricher,
    workers: Vec<WorkerEventPayload>,
) -> (Arc<ConnectionSupervisor>, CancellationToken) {
    let supervisor = Arc::new(ConnectionSupervisor::new(
        "tcp://hub.test:7400",
        Arc::new(MockConnector::new(hub.clone())),
        Arc::new(AckHandler),
        Arc::new(FixedSync { workers }),
        enricher,
        SupervisorSettings {
            reconnect_delay: Duration::from_secs(1),
            queue_capacity: 20,
        },
    ));
    let cancel = CancellationToken::new();
    tokio::spawn(supervisor.clone().run(cancel.clone()));
    (supervisor, cancel)
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_resends_handshake_and_snapshot() {
    let hub = MockHub::new();
    let enricher = Enricher::new(Uuid::new_v4());
    let (supervisor, cancel) = spawn_supervisor(
        &hub,
        enricher.clone(),
        vec![worker_event("cam-1"), worker_event("cam-2")],
    );

    assert!(
        wait_until(Duration::from_secs(5), || hub
            .calls_to(methods::RECEIVE_WORKER_EVENT)
            .len()
            == 2)
        .await
    );
    assert_eq!(hub.calls()[0].method, methods::RECEIVE_SYSTEM_INFO);

    supervisor.offer(Arc::new(enricher.enrich(metric(1.0))));
    assert!(wait_until(Duration::from_secs(5), || hub.calls_to(methods::RECEIVE_METRIC).len() == 1).await);

    hub.drop_connection();
    assert!(wait_until(Duration::from_secs(10), || hub.connect_count() == 2).await);
    assert!(
        wait_until(Duration::from_secs(5), || hub
            .calls_to(methods::RECEIVE_WORKER_EVENT)
            .len()
            == 4)
        .await
    );

    let calls = hub.calls();
    let second_session: Vec<_> = calls.iter().filter(|call| call.session == 2).collect();
    assert_eq!(second_session[0].method, methods::RECEIVE_SYSTEM_INFO);
    assert_eq!(
        second_session
            .iter()
            .filter(|call| call.method == methods::RECEIVE_WORKER_EVENT)
            .count(),
        2
    );

    // Per-connection sequence keeps counting across reconnects
    let sequences: Vec<u64> = calls.iter().map(|call| call.connection_sequence()).collect();
    assert!(sequences.iter().all(|sequence| *sequence > 0));
    assert!(sequences.windows(2).all(|pair| pair[0] < pair[1]));

    let stats = supervisor.stats();
    assert_eq!(stats.connections, 2);
    assert_eq!(stats.delivered, 7);

    cancel.cancel();
    assert!(wait_until(Duration::from_secs(5), || supervisor.state() == ConnectionState::Disconnected).await);
}

#[tokio::test(start_paused = true)]
async fn test_worker_event_buffered_while_disconnected_is_superseded_by_snapshot() {
    let hub = MockHub::new();
    let enricher = Enricher::new(Uuid::new_v4());
    let (supervisor, cancel) = spawn_supervisor(
        &hub,
        enricher.clone(),
        vec![worker_event("cam-1"), worker_event("cam-2")],
    );
    assert!(wait_until(Duration::from_secs(5), || hub.calls_to(methods::RECEIVE_WORKER_EVENT).len() == 2).await);

    hub.drop_connection();
    assert!(wait_until(Duration::from_millis(500), || !supervisor.is_connected()).await);
    assert_eq!(hub.connect_count(), 1);

    // Buffered during the reconnect delay, so it predates the next sync
    supervisor.offer(Arc::new(enricher.enrich(MessagePayload::WorkerEvent(worker_event("buffered")))));
    std::thread::sleep(Duration::from_millis(2));

    assert!(wait_until(Duration::from_secs(10), || hub.connect_count() == 2).await);
    assert!(wait_until(Duration::from_secs(5), || hub.calls_to(methods::RECEIVE_WORKER_EVENT).len() == 4).await);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(supervisor.stats().stale_discarded, 1);
    let second_session: Vec<String> = hub
        .calls_to(methods::RECEIVE_WORKER_EVENT)
        .iter()
        .filter(|call| call.session == 2)
        .map(|call| call.payload["payload"]["name"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(second_session, vec!["cam-1", "cam-2"]);

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_worker_events_older_than_sync_are_discarded() {
    let hub = MockHub::new();
    let enricher = Enricher::new(Uuid::new_v4());

    // Enriched before the session exists, so its timestamp predates the sync
    let stale = Arc::new(enricher.enrich(MessagePayload::WorkerEvent(worker_event("old"))));
    std::thread::sleep(Duration::from_millis(2));

    let (supervisor, cancel) = spawn_supervisor(&hub, enricher.clone(), Vec::new());
    assert!(wait_until(Duration::from_secs(5), || supervisor.is_connected()).await);
    assert!(wait_until(Duration::from_secs(5), || hub.calls_to(methods::RECEIVE_SYSTEM_INFO).len() == 1).await);

    supervisor.offer(stale);
    let fresh = worker_event("fresh");
    supervisor.offer(Arc::new(enricher.enrich(MessagePayload::WorkerEvent(fresh.clone()))));

    assert!(wait_until(Duration::from_secs(5), || hub.calls_to(methods::RECEIVE_WORKER_EVENT).len() == 1).await);
    let delivered = &hub.calls_to(methods::RECEIVE_WORKER_EVENT)[0];
    assert_eq!(delivered.payload["payload"]["name"], "fresh");
    assert_eq!(supervisor.stats().stale_discarded, 1);

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_missing_method_becomes_dead_letter() {
    let hub = MockHub::new();
    hub.reject_method(methods::RECEIVE_METRIC);
    let enricher = Enricher::new(Uuid::new_v4());
    let (supervisor, cancel) = spawn_supervisor(&hub, enricher.clone(), Vec::new());
    assert!(wait_until(Duration::from_secs(5), || supervisor.is_connected()).await);

    let original = Arc::new(enricher.enrich(metric(3.0)));
    supervisor.offer(original.clone());

    assert!(wait_until(Duration::from_secs(5), || hub.calls_to(methods::RECEIVE_DEAD_LETTER).len() == 1).await);
    let dead_letter = &hub.calls_to(methods::RECEIVE_DEAD_LETTER)[0];
    assert_eq!(dead_letter.kind(), "dead_letter");
    assert_eq!(dead_letter.payload["payload"]["method"], methods::RECEIVE_METRIC);
    assert_eq!(
        dead_letter.payload["payload"]["original_sequence"],
        original.sequence_number()
    );
    assert_eq!(supervisor.stats().dead_lettered, 1);
    assert!(supervisor.is_connected());

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_refused_connections_are_retried() {
    let hub = MockHub::new();
    hub.refuse_next_connections(3);
    let (supervisor, cancel) = spawn_supervisor(&hub, Enricher::new(Uuid::new_v4()), Vec::new());

    assert!(wait_until(Duration::from_secs(10), || supervisor.is_connected()).await);
    let stats = supervisor.stats();
    assert_eq!(stats.connection_attempts, 4);
    assert_eq!(stats.connections, 1);

    cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_triggers_reconnect() {
    let hub = MockHub::new();
    let enricher = Enricher::new(Uuid::new_v4());
    let (supervisor, cancel) = spawn_supervisor(&hub, enricher.clone(), Vec::new());
    assert!(wait_until(Duration::from_secs(5), || hub.calls_to(methods::RECEIVE_SYSTEM_INFO).len() == 1).await);

    hub.fail_next_invokes(1);
    supervisor.offer(Arc::new(enricher.enrich(metric(1.0))));

    assert!(wait_until(Duration::from_secs(10), || hub.connect_count() == 2).await);
    assert!(wait_until(Duration::from_secs(5), || hub.calls_to(methods::RECEIVE_SYSTEM_INFO).len() == 2).await);
    assert_eq!(supervisor.stats().transport_failures, 1);

    cancel.cancel();
}
