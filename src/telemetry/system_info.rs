//! Engine identity and the per-connection sync source for hub supervisors.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::hub::SessionSync;
use crate::messaging::{SystemInfoPayload, WorkerEventPayload};
use crate::worker::WorkerManager;

#[derive(Debug, Clone)]
pub struct SystemInfoProvider {
    engine_id: Uuid,
    name: String,
    description: String,
    started_at: DateTime<Utc>,
    workers: Arc<WorkerManager>,
}

impl SystemInfoProvider {
    pub fn new(
        engine_id: Uuid,
        name: impl Into<String>,
        description: impl Into<String>,
        workers: Arc<WorkerManager>,
    ) -> Self {
        Self {
            engine_id,
            name: name.into(),
            description: description.into(),
            started_at: Utc::now(),
            workers,
        }
    }

    pub fn engine_id(&self) -> Uuid {
        self.engine_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn info(&self) -> SystemInfoPayload {
        SystemInfoPayload {
            engine_name: self.name.clone(),
            description: self.description.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            started_at: self.started_at,
            worker_count: self.workers.len(),
        }
    }
}

#[async_trait]
impl SessionSync for SystemInfoProvider {
    async fn engine_info(&self) -> SystemInfoPayload {
        self.info()
    }

    async fn worker_snapshot(&self) -> Vec<WorkerEventPayload> {
        self.workers.snapshot()
    }
}
