//! Repository whose worker reads return a snapshot taken before a delay.

use async_trait::async_trait;
use engine_gateway::error::Result;
use engine_gateway::repository::{
    ChangeLogEntry, EngineEntity, InMemoryRepository, Repository, WorkerEntity, WorkerEventRecord,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug)]
pub struct SlowReadRepository {
    inner: Arc<InMemoryRepository>,
    read_delay: Duration,
}

impl SlowReadRepository {
    pub fn new(inner: Arc<InMemoryRepository>, read_delay: Duration) -> Self {
        Self { inner, read_delay }
    }
}

#[async_trait]
impl Repository for SlowReadRepository {
    async fn get_worker(&self, id: Uuid) -> Result<Option<WorkerEntity>> {
        let snapshot = self.inner.get_worker(id).await;
        tokio::time::sleep(self.read_delay).await;
        snapshot
    }

    async fn list_workers(&self) -> Result<Vec<WorkerEntity>> {
        self.inner.list_workers().await
    }

    async fn create_worker(&self, entity: WorkerEntity) -> Result<()> {
        self.inner.create_worker(entity).await
    }

    async fn update_worker(&self, entity: WorkerEntity) -> Result<()> {
        self.inner.update_worker(entity).await
    }

    async fn delete_worker(&self, id: Uuid) -> Result<()> {
        self.inner.delete_worker(id).await
    }

    async fn append_worker_event(
        &self,
        worker_id: Uuid,
        message: String,
        recent_logs: Vec<String>,
    ) -> Result<WorkerEventRecord> {
        self.inner
            .append_worker_event(worker_id, message, recent_logs)
            .await
    }

    async fn worker_events(&self, worker_id: Uuid, limit: usize) -> Result<Vec<WorkerEventRecord>> {
        self.inner.worker_events(worker_id, limit).await
    }

    async fn append_change_log(&self, entry: ChangeLogEntry) -> Result<()> {
        self.inner.append_change_log(entry).await
    }

    async fn get_engine(&self) -> Result<Option<EngineEntity>> {
        self.inner.get_engine().await
    }

    async fn update_engine(&self, engine: EngineEntity) -> Result<()> {
        self.inner.update_engine(engine).await
    }

    async fn add_hub_url(&self, url: &str) -> Result<()> {
        self.inner.add_hub_url(url).await
    }

    async fn remove_hub_url(&self, url: &str) -> Result<()> {
        self.inner.remove_hub_url(url).await
    }

    async fn edit_hub_url(&self, old_url: &str, new_url: &str) -> Result<()> {
        self.inner.edit_hub_url(old_url, new_url).await
    }
}
