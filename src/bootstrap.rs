//! # Engine Gateway Bootstrap
//!
//! Wires every component of a running engine and owns their lifecycle:
//!
//! - **Engine record**: loaded from the repository, or created from configuration on first run
//! - **Workers**: controllers built for every stored worker, enabled ones autostarted
//! - **Hubs**: one supervisor per URL from configuration and the engine record, plus the
//!   global fan-out loop
//! - **Metrics**: periodic engine metrics when enabled
//! - **Graceful shutdown**: workers stop first so their final state still reaches the queue,
//!   then every loop is cancelled and awaited
//!
//! ```rust,no_run
//! use engine_gateway::bootstrap::GatewayBootstrap;
//! use engine_gateway::config::ConfigManager;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigManager::load("config/engine-gateway.yaml")?;
//! let gateway = GatewayBootstrap::new(config).start().await?;
//! // ... run until a shutdown signal arrives
//! gateway.shutdown().await;
//! # Ok(())
//! # }
//! ```

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::commands::{CommandHandler, CommandRouter};
use crate::config::ConfigManager;
use crate::error::Result;
use crate::hub::{HubConnector, HubManager, SupervisorSettings, TcpHubConnector};
use crate::messaging::{
    Enricher, LogEntryPayload, LogLevel, MessagePayload, MessagePublisher, MultiQueue,
};
use crate::repository::{EngineEntity, InMemoryRepository, KeyedMutex, Repository};
use crate::telemetry::{MetricsCollector, SystemInfoProvider};
use crate::worker::{
    BackendRegistry, ControllerContext, ControllerSettings, ManagerSettings, WorkerManager,
};

/// Collaborators that can be swapped before the gateway starts
pub struct GatewayBootstrap {
    config: Arc<ConfigManager>,
    repository: Arc<dyn Repository>,
    connector: Arc<dyn HubConnector>,
    registry: Arc<BackendRegistry>,
}

impl GatewayBootstrap {
    /// In-memory repository, TCP transport and the bundled backends
    pub fn new(config: Arc<ConfigManager>) -> Self {
        Self {
            config,
            repository: Arc::new(InMemoryRepository::new()),
            connector: Arc::new(TcpHubConnector::default()),
            registry: Arc::new(BackendRegistry::with_defaults()),
        }
    }

    pub fn with_repository(mut self, repository: Arc<dyn Repository>) -> Self {
        self.repository = repository;
        self
    }

    pub fn with_connector(mut self, connector: Arc<dyn HubConnector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_registry(mut self, registry: Arc<BackendRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub async fn start(self) -> Result<EngineGateway> {
        let config = self.config.config().clone();
        info!(
            environment = %self.config.environment(),
            engine = %config.engine.name,
            "🚀 Starting engine gateway"
        );

        let engine = match self.repository.get_engine().await? {
            Some(engine) => engine,
            None => {
                let engine = EngineEntity::new(
                    config.engine.engine_id.unwrap_or_else(Uuid::new_v4),
                    config.engine.name.clone(),
                    config.engine.description.clone(),
                );
                self.repository.update_engine(engine.clone()).await?;
                info!(engine_id = %engine.id, "Engine record created");
                engine
            }
        };

        let global_queue = Arc::new(MultiQueue::new("global", config.queue.kind_capacity));
        let enricher = Enricher::new(engine.id);
        let publisher = MessagePublisher::new(enricher.clone(), global_queue.clone());

        let context = ControllerContext {
            publisher: publisher.clone(),
            repository: self.repository.clone(),
            worker_locks: Arc::new(KeyedMutex::new()),
            settings: ControllerSettings::from_config(&config),
        };
        let workers = Arc::new(WorkerManager::new(
            context,
            self.registry.clone(),
            ManagerSettings::from_config(&config),
        ));
        let router = Arc::new(CommandRouter::new(workers.clone()));
        let system_info = Arc::new(SystemInfoProvider::new(
            engine.id,
            engine.name.clone(),
            engine.description.clone(),
            workers.clone(),
        ));

        let hubs = Arc::new(HubManager::new(
            self.connector.clone(),
            router.clone() as Arc<dyn CommandHandler>,
            system_info.clone(),
            enricher,
            self.repository.clone(),
            global_queue.clone(),
            SupervisorSettings::from_config(&config),
        ));

        let loaded = workers.load_from_repository().await?;

        let urls: BTreeSet<String> = config
            .hubs
            .urls
            .iter()
            .chain(engine.hub_urls.iter())
            .map(|url| url.trim().to_string())
            .collect();
        for url in &urls {
            if let Err(e) = hubs.start_hub(url) {
                warn!(hub_url = %url, error = %e, "Hub not started");
            }
        }
        hubs.start_fan_out().await;

        let shutdown = CancellationToken::new();
        let metrics_task = if config.telemetry.metrics_enabled {
            let collector = Arc::new(MetricsCollector::new(
                publisher.clone(),
                workers.clone(),
                hubs.clone(),
                config.telemetry.metrics_interval(),
            ));
            Some(tokio::spawn(collector.run(shutdown.child_token())))
        } else {
            None
        };

        publisher.publish(MessagePayload::LogEntry(LogEntryPayload {
            worker_id: None,
            level: LogLevel::Info,
            message: format!("Engine {} started with {loaded} workers", engine.name),
            logged_at: Utc::now(),
        }));

        info!(
            engine_id = %engine.id,
            workers = loaded,
            hubs = urls.len(),
            "✅ Engine gateway running"
        );

        Ok(EngineGateway {
            config: self.config,
            engine,
            publisher,
            repository: self.repository,
            workers,
            hubs,
            router,
            system_info,
            shutdown,
            metrics_task: Mutex::new(metrics_task),
        })
    }
}

/// Handle to a running engine
pub struct EngineGateway {
    config: Arc<ConfigManager>,
    engine: EngineEntity,
    publisher: MessagePublisher,
    repository: Arc<dyn Repository>,
    workers: Arc<WorkerManager>,
    hubs: Arc<HubManager>,
    router: Arc<CommandRouter>,
    system_info: Arc<SystemInfoProvider>,
    shutdown: CancellationToken,
    metrics_task: Mutex<Option<JoinHandle<()>>>,
}

impl EngineGateway {
    pub fn engine_id(&self) -> Uuid {
        self.engine.id
    }

    pub fn engine(&self) -> &EngineEntity {
        &self.engine
    }

    pub fn config(&self) -> &Arc<ConfigManager> {
        &self.config
    }

    pub fn publisher(&self) -> &MessagePublisher {
        &self.publisher
    }

    pub fn global_queue(&self) -> &Arc<MultiQueue> {
        self.publisher.queue()
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    pub fn workers(&self) -> &Arc<WorkerManager> {
        &self.workers
    }

    pub fn hubs(&self) -> &Arc<HubManager> {
        &self.hubs
    }

    /// Inbound command entry point, as handed to hub sessions
    pub fn commands(&self) -> &Arc<CommandRouter> {
        &self.router
    }

    pub fn system_info(&self) -> &Arc<SystemInfoProvider> {
        &self.system_info
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            warn!("Engine gateway already stopped");
            return;
        }
        info!(engine_id = %self.engine.id, "🛑 Engine gateway shutdown requested");

        self.workers.shutdown().await;
        self.shutdown.cancel();
        if let Some(task) = self.metrics_task.lock().await.take() {
            let _ = task.await;
        }
        self.hubs.shutdown().await;

        info!(engine_id = %self.engine.id, "Engine gateway stopped");
    }
}
