//! # Backend Registry
//!
//! Explicit mapping from a configured backend name to the constructor that builds it.
//! The bundled `simulated` and `process` backends are registered by
//! [`BackendRegistry::with_defaults`]; embedders register their own at startup.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::backend::StreamingBackend;
use super::process::ProcessBackend;
use super::simulated::SimulatedBackend;
use crate::constants::backends;
use crate::error::{GatewayError, Result};

/// Inputs available to a backend constructor
#[derive(Debug, Clone)]
pub struct BackendContext {
    pub worker_id: Uuid,
    pub command: String,
}

pub type BackendConstructor =
    Arc<dyn Fn(&BackendContext) -> Arc<dyn StreamingBackend> + Send + Sync>;

pub struct BackendRegistry {
    constructors: RwLock<HashMap<String, BackendConstructor>>,
}

impl BackendRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            constructors: RwLock::new(HashMap::new()),
        }
    }

    /// Registry with the bundled backends
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(backends::SIMULATED, |ctx: &BackendContext| {
            Arc::new(SimulatedBackend::new(ctx.worker_id, ctx.command.clone()))
                as Arc<dyn StreamingBackend>
        });
        registry.register(backends::PROCESS, |ctx: &BackendContext| {
            Arc::new(ProcessBackend::new(ctx.worker_id, ctx.command.clone()))
                as Arc<dyn StreamingBackend>
        });
        registry
    }

    /// Register or replace a constructor
    pub fn register<F>(&self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&BackendContext) -> Arc<dyn StreamingBackend> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(backend = %name, "Registering streaming backend");
        self.constructors
            .write()
            .insert(name, Arc::new(constructor));
    }

    pub fn create(&self, name: &str, context: &BackendContext) -> Result<Arc<dyn StreamingBackend>> {
        let constructor = self
            .constructors
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownBackend(name.to_string()))?;
        Ok(constructor(context))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> BackendContext {
        BackendContext {
            worker_id: Uuid::new_v4(),
            command: "ffmpeg -i rtsp://cam".to_string(),
        }
    }

    #[test]
    fn test_defaults_are_registered() {
        let registry = BackendRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["process", "simulated"]);

        let backend = registry.create("simulated", &context()).unwrap();
        assert_eq!(backend.name(), "simulated");
        assert_eq!(backend.command(), "ffmpeg -i rtsp://cam");
    }

    #[test]
    fn test_unknown_backend() {
        let registry = BackendRegistry::new();
        let err = registry.create("gstreamer", &context()).unwrap_err();
        assert_eq!(err, GatewayError::UnknownBackend("gstreamer".to_string()));
    }

    #[test]
    fn test_custom_registration_overrides() {
        let registry = BackendRegistry::with_defaults();
        registry.register("process", |ctx: &BackendContext| {
            Arc::new(SimulatedBackend::new(ctx.worker_id, "override")) as Arc<dyn StreamingBackend>
        });
        let backend = registry.create("process", &context()).unwrap();
        assert_eq!(backend.command(), "override");
    }
}
