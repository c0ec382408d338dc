#![allow(dead_code)]

pub mod mock_backend;
pub mod mock_hub;
pub mod slow_repository;
pub mod strategies;

pub use mock_backend::*;
pub use mock_hub::*;
pub use slow_repository::*;

use engine_gateway::messaging::{Enricher, MessagePublisher, MultiQueue};
use engine_gateway::repository::{InMemoryRepository, KeyedMutex};
use engine_gateway::worker::{ControllerContext, ControllerSettings};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Controller context over a fresh in-memory repository and global queue
pub fn test_context(settings: ControllerSettings) -> (ControllerContext, Arc<InMemoryRepository>) {
    let repository = Arc::new(InMemoryRepository::new());
    let context = ControllerContext {
        publisher: MessagePublisher::new(
            Enricher::new(Uuid::new_v4()),
            Arc::new(MultiQueue::new("global", 50)),
        ),
        repository: repository.clone(),
        worker_locks: Arc::new(KeyedMutex::new()),
        settings,
    };
    (context, repository)
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
