//! In-process repository backed by concurrent maps.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use uuid::Uuid;

use super::models::{ChangeLogEntry, EngineEntity, WorkerEntity, WorkerEventRecord};
use super::Repository;
use crate::constants::MAX_WORKER_EVENTS_PER_WORKER;
use crate::error::{GatewayError, Result};

#[derive(Debug)]
pub struct InMemoryRepository {
    workers: DashMap<Uuid, WorkerEntity>,
    worker_events: DashMap<Uuid, VecDeque<WorkerEventRecord>>,
    change_log: Mutex<Vec<ChangeLogEntry>>,
    engine: RwLock<Option<EngineEntity>>,
    max_events_per_worker: usize,
    unavailable: AtomicBool,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::with_event_limit(MAX_WORKER_EVENTS_PER_WORKER)
    }

    pub fn with_event_limit(max_events_per_worker: usize) -> Self {
        Self {
            workers: DashMap::new(),
            worker_events: DashMap::new(),
            change_log: Mutex::new(Vec::new()),
            engine: RwLock::new(None),
            max_events_per_worker: max_events_per_worker.max(1),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate a storage outage: every operation fails until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn change_log(&self) -> Vec<ChangeLogEntry> {
        self.change_log.lock().clone()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(GatewayError::repository("repository unavailable"))
        } else {
            Ok(())
        }
    }

    fn with_engine<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut EngineEntity) -> Result<()>,
    {
        let mut guard = self.engine.write();
        let engine = guard
            .as_mut()
            .ok_or_else(|| GatewayError::repository("engine record has not been created"))?;
        mutate(engine)
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_worker(&self, id: Uuid) -> Result<Option<WorkerEntity>> {
        self.check_available()?;
        Ok(self.workers.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list_workers(&self) -> Result<Vec<WorkerEntity>> {
        self.check_available()?;
        let mut workers: Vec<WorkerEntity> =
            self.workers.iter().map(|entry| entry.value().clone()).collect();
        workers.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(workers)
    }

    async fn create_worker(&self, entity: WorkerEntity) -> Result<()> {
        self.check_available()?;
        match self.workers.entry(entity.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(GatewayError::WorkerExists(entity.id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(entity);
                Ok(())
            }
        }
    }

    async fn update_worker(&self, entity: WorkerEntity) -> Result<()> {
        self.check_available()?;
        match self.workers.get_mut(&entity.id) {
            Some(mut existing) => {
                *existing = entity;
                Ok(())
            }
            None => Err(GatewayError::WorkerNotFound(entity.id)),
        }
    }

    async fn delete_worker(&self, id: Uuid) -> Result<()> {
        self.check_available()?;
        self.workers
            .remove(&id)
            .map(|_| ())
            .ok_or(GatewayError::WorkerNotFound(id))?;
        self.worker_events.remove(&id);
        Ok(())
    }

    async fn append_worker_event(
        &self,
        worker_id: Uuid,
        message: String,
        recent_logs: Vec<String>,
    ) -> Result<WorkerEventRecord> {
        self.check_available()?;
        let record = WorkerEventRecord {
            id: Uuid::new_v4(),
            worker_id,
            message,
            logs: recent_logs,
            occurred_at: Utc::now(),
        };

        let mut history = self.worker_events.entry(worker_id).or_default();
        history.push_front(record.clone());
        history.truncate(self.max_events_per_worker);

        debug!(
            worker_id = %worker_id,
            records = history.len(),
            "Worker event record appended"
        );
        Ok(record)
    }

    async fn worker_events(&self, worker_id: Uuid, limit: usize) -> Result<Vec<WorkerEventRecord>> {
        self.check_available()?;
        Ok(self
            .worker_events
            .get(&worker_id)
            .map(|history| history.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn append_change_log(&self, entry: ChangeLogEntry) -> Result<()> {
        self.check_available()?;
        self.change_log.lock().push(entry);
        Ok(())
    }

    async fn get_engine(&self) -> Result<Option<EngineEntity>> {
        self.check_available()?;
        Ok(self.engine.read().clone())
    }

    async fn update_engine(&self, engine: EngineEntity) -> Result<()> {
        self.check_available()?;
        *self.engine.write() = Some(engine);
        Ok(())
    }

    async fn add_hub_url(&self, url: &str) -> Result<()> {
        self.check_available()?;
        self.with_engine(|engine| {
            if engine.hub_urls.iter().any(|existing| existing == url) {
                return Err(GatewayError::HubExists(url.to_string()));
            }
            engine.hub_urls.push(url.to_string());
            Ok(())
        })
    }

    async fn remove_hub_url(&self, url: &str) -> Result<()> {
        self.check_available()?;
        self.with_engine(|engine| {
            let before = engine.hub_urls.len();
            engine.hub_urls.retain(|existing| existing != url);
            if engine.hub_urls.len() == before {
                return Err(GatewayError::HubNotFound(url.to_string()));
            }
            Ok(())
        })
    }

    async fn edit_hub_url(&self, old_url: &str, new_url: &str) -> Result<()> {
        self.check_available()?;
        self.with_engine(|engine| {
            if old_url != new_url && engine.hub_urls.iter().any(|existing| existing == new_url) {
                return Err(GatewayError::HubExists(new_url.to_string()));
            }
            let slot = engine
                .hub_urls
                .iter_mut()
                .find(|existing| existing.as_str() == old_url)
                .ok_or_else(|| GatewayError::HubNotFound(old_url.to_string()))?;
            *slot = new_url.to_string();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker() -> WorkerEntity {
        WorkerEntity::new("cam-1", "", "ffmpeg -i rtsp://cam-1", "simulated")
    }

    #[tokio::test]
    async fn test_worker_crud() {
        let repo = InMemoryRepository::new();
        let mut entity = worker();

        repo.create_worker(entity.clone()).await.unwrap();
        assert_eq!(
            repo.create_worker(entity.clone()).await,
            Err(GatewayError::WorkerExists(entity.id))
        );

        entity.name = "cam-1b".to_string();
        repo.update_worker(entity.clone()).await.unwrap();
        let loaded = repo.get_worker(entity.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "cam-1b");

        repo.delete_worker(entity.id).await.unwrap();
        assert!(repo.get_worker(entity.id).await.unwrap().is_none());
        assert_eq!(
            repo.update_worker(entity.clone()).await,
            Err(GatewayError::WorkerNotFound(entity.id))
        );
    }

    #[tokio::test]
    async fn test_worker_events_are_bounded_and_newest_first() {
        let repo = InMemoryRepository::with_event_limit(3);
        let id = Uuid::new_v4();

        for i in 0..5 {
            repo.append_worker_event(id, format!("event {i}"), vec![format!("log {i}")])
                .await
                .unwrap();
        }

        let events = repo.worker_events(id, 10).await.unwrap();
        let messages: Vec<&str> = events.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["event 4", "event 3", "event 2"]);
        assert_eq!(repo.worker_events(id, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_hub_url_management() {
        let repo = InMemoryRepository::new();
        assert!(repo.add_hub_url("https://hub-a").await.is_err());

        repo.update_engine(EngineEntity::new(Uuid::new_v4(), "engine", ""))
            .await
            .unwrap();
        repo.add_hub_url("https://hub-a").await.unwrap();
        assert_eq!(
            repo.add_hub_url("https://hub-a").await,
            Err(GatewayError::HubExists("https://hub-a".to_string()))
        );

        repo.edit_hub_url("https://hub-a", "https://hub-b").await.unwrap();
        assert_eq!(
            repo.remove_hub_url("https://hub-a").await,
            Err(GatewayError::HubNotFound("https://hub-a".to_string()))
        );
        repo.remove_hub_url("https://hub-b").await.unwrap();
        assert!(repo.get_engine().await.unwrap().unwrap().hub_urls.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_repository_fails_operations() {
        let repo = InMemoryRepository::new();
        repo.set_unavailable(true);
        assert!(matches!(
            repo.list_workers().await,
            Err(GatewayError::Repository(_))
        ));
        repo.set_unavailable(false);
        assert!(repo.list_workers().await.unwrap().is_empty());
    }
}
