//! # Repository
//!
//! Durable storage contract for worker configuration, worker event history, the change log
//! and the engine record (including its hub URL list). The gateway treats storage as an
//! external collaborator; [`InMemoryRepository`] is the bundled implementation.

pub mod keyed_mutex;
pub mod memory;
pub mod models;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;

pub use keyed_mutex::KeyedMutex;
pub use memory::InMemoryRepository;
pub use models::{ChangeLogEntry, EngineEntity, WatchdogSettings, WorkerEntity, WorkerEventRecord};

#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_worker(&self, id: Uuid) -> Result<Option<WorkerEntity>>;

    async fn list_workers(&self) -> Result<Vec<WorkerEntity>>;

    /// Fails with `WorkerExists` when the id is taken
    async fn create_worker(&self, entity: WorkerEntity) -> Result<()>;

    /// Fails with `WorkerNotFound` when the id is unknown
    async fn update_worker(&self, entity: WorkerEntity) -> Result<()>;

    async fn delete_worker(&self, id: Uuid) -> Result<()>;

    async fn append_worker_event(
        &self,
        worker_id: Uuid,
        message: String,
        recent_logs: Vec<String>,
    ) -> Result<WorkerEventRecord>;

    /// Most recent records first
    async fn worker_events(&self, worker_id: Uuid, limit: usize) -> Result<Vec<WorkerEventRecord>>;

    async fn append_change_log(&self, entry: ChangeLogEntry) -> Result<()>;

    async fn get_engine(&self) -> Result<Option<EngineEntity>>;

    async fn update_engine(&self, engine: EngineEntity) -> Result<()>;

    async fn add_hub_url(&self, url: &str) -> Result<()>;

    async fn remove_hub_url(&self, url: &str) -> Result<()>;

    async fn edit_hub_url(&self, old_url: &str, new_url: &str) -> Result<()>;
}
