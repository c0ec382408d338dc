//! # Hub Manager
//!
//! Owns one [`ConnectionSupervisor`] per configured hub URL and the fan-out loop that copies
//! every message from the global queue into each peer queue. Adding, removing and editing a
//! hub persists the change through the repository and starts or cancels the matching
//! supervisor.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::supervisor::{
    ConnectionSupervisor, SessionSync, SupervisorSettings, SupervisorStatsSnapshot,
};
use super::transport::HubConnector;
use crate::commands::CommandHandler;
use crate::config::validate_hub_url;
use crate::error::{GatewayError, Result};
use crate::logging::log_hub_operation;
use crate::messaging::{Enricher, Envelope, MultiQueue};
use crate::repository::Repository;

struct SupervisorHandle {
    supervisor: Arc<ConnectionSupervisor>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

type Supervisors = Arc<DashMap<String, SupervisorHandle>>;

pub struct HubManager {
    supervisors: Supervisors,
    connector: Arc<dyn HubConnector>,
    handler: Arc<dyn CommandHandler>,
    sync: Arc<dyn SessionSync>,
    enricher: Enricher,
    repository: Arc<dyn Repository>,
    global_queue: Arc<MultiQueue>,
    settings: SupervisorSettings,
    shutdown: CancellationToken,
    fan_out: Mutex<Option<JoinHandle<()>>>,
}

impl HubManager {
    pub fn new(
        connector: Arc<dyn HubConnector>,
        handler: Arc<dyn CommandHandler>,
        sync: Arc<dyn SessionSync>,
        enricher: Enricher,
        repository: Arc<dyn Repository>,
        global_queue: Arc<MultiQueue>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            supervisors: Arc::new(DashMap::new()),
            connector,
            handler,
            sync,
            enricher,
            repository,
            global_queue,
            settings,
            shutdown: CancellationToken::new(),
            fan_out: Mutex::new(None),
        }
    }

    /// Spawn a supervisor for `url` without touching the repository
    pub fn start_hub(&self, url: &str) -> Result<Arc<ConnectionSupervisor>> {
        let url = normalize(url)?;
        let slot = match self.supervisors.entry(url.clone()) {
            Entry::Occupied(_) => return Err(GatewayError::HubExists(url)),
            Entry::Vacant(slot) => slot,
        };

        let supervisor = Arc::new(ConnectionSupervisor::new(
            url.clone(),
            self.connector.clone(),
            self.handler.clone(),
            self.sync.clone(),
            self.enricher.clone(),
            self.settings.clone(),
        ));
        let cancel = self.shutdown.child_token();
        let task = tokio::spawn(supervisor.clone().run(cancel.clone()));

        slot.insert(SupervisorHandle {
            supervisor: supervisor.clone(),
            cancel,
            task,
        });
        log_hub_operation("start", &url, "supervising", None);
        Ok(supervisor)
    }

    /// Cancel the supervisor for `url` and wait for it to exit
    pub async fn stop_hub(&self, url: &str) -> Result<()> {
        let (url, handle) = self
            .supervisors
            .remove(url.trim())
            .ok_or_else(|| GatewayError::HubNotFound(url.to_string()))?;

        handle.cancel.cancel();
        if let Err(e) = handle.task.await {
            warn!(hub_url = %url, error = %e, "Supervisor task ended abnormally");
        }
        log_hub_operation("stop", &url, "stopped", None);
        Ok(())
    }

    pub async fn add_hub(&self, url: &str) -> Result<()> {
        let url = normalize(url)?;
        if self.supervisors.contains_key(&url) {
            return Err(GatewayError::HubExists(url));
        }
        self.repository.add_hub_url(&url).await?;
        self.start_hub(&url)?;
        Ok(())
    }

    pub async fn remove_hub(&self, url: &str) -> Result<()> {
        let url = url.trim();
        self.repository.remove_hub_url(url).await?;
        match self.stop_hub(url).await {
            Err(GatewayError::HubNotFound(_)) => {
                debug!(hub_url = %url, "Removed hub had no running supervisor");
                Ok(())
            }
            other => other,
        }
    }

    pub async fn edit_hub(&self, old_url: &str, new_url: &str) -> Result<()> {
        let old_url = old_url.trim();
        let new_url = normalize(new_url)?;
        if old_url != new_url && self.supervisors.contains_key(&new_url) {
            return Err(GatewayError::HubExists(new_url));
        }

        self.repository.edit_hub_url(old_url, &new_url).await?;
        if let Err(e) = self.stop_hub(old_url).await {
            debug!(hub_url = %old_url, error = %e, "Edited hub had no running supervisor");
        }
        self.start_hub(&new_url)?;
        Ok(())
    }

    /// Start the loop copying global messages into every peer queue
    pub async fn start_fan_out(&self) {
        let mut fan_out = self.fan_out.lock().await;
        if fan_out.is_some() {
            return;
        }

        let queue = self.global_queue.clone();
        let cancel = self.shutdown.child_token();
        let supervisors = self.supervisors.clone();
        *fan_out = Some(tokio::spawn(async move {
            while let Some(message) = queue.dequeue(&cancel).await {
                offer_to_all(&supervisors, message);
            }
            debug!("Fan-out loop stopped");
        }));
    }

    /// Copy one message into every peer queue
    pub fn fan_out(&self, message: Arc<Envelope>) {
        offer_to_all(&self.supervisors, message);
    }

    pub fn supervisor(&self, url: &str) -> Option<Arc<ConnectionSupervisor>> {
        self.supervisors
            .get(url.trim())
            .map(|entry| entry.value().supervisor.clone())
    }

    pub fn urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.supervisors.iter().map(|e| e.key().clone()).collect();
        urls.sort();
        urls
    }

    pub fn len(&self) -> usize {
        self.supervisors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.supervisors.is_empty()
    }

    pub fn connected_count(&self) -> usize {
        self.supervisors
            .iter()
            .filter(|entry| entry.value().supervisor.is_connected())
            .count()
    }

    pub fn stats(&self) -> Vec<(String, SupervisorStatsSnapshot)> {
        let mut stats: Vec<(String, SupervisorStatsSnapshot)> = self
            .supervisors
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().supervisor.stats()))
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }

    /// Cancel the fan-out loop and every supervisor, then wait for them to exit
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        if let Some(task) = self.fan_out.lock().await.take() {
            let _ = task.await;
        }

        let urls: Vec<String> = self.supervisors.iter().map(|e| e.key().clone()).collect();
        for url in urls {
            if let Err(e) = self.stop_hub(&url).await {
                debug!(hub_url = %url, error = %e, "Supervisor already removed");
            }
        }
        info!("📡 Hub manager shut down");
    }
}

fn offer_to_all(supervisors: &DashMap<String, SupervisorHandle>, message: Arc<Envelope>) {
    for entry in supervisors.iter() {
        entry.value().supervisor.offer(message.clone());
    }
}

fn normalize(url: &str) -> Result<String> {
    let url = url.trim();
    validate_hub_url(url).map_err(|e| GatewayError::validation(e.to_string()))?;
    Ok(url.to_string())
}

impl fmt::Debug for HubManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubManager")
            .field("hubs", &self.urls())
            .field("connector", &self.connector)
            .finish()
    }
}
