//! Hub Transport Abstraction
//!
//! The gateway talks to hubs through a "remote invoke a named method with a payload" contract.
//! Concrete transports implement [`HubConnector`] and hand back a [`HubSession`] per live
//! connection; inbound commands from the hub are delivered to the [`CommandHandler`] given at
//! connect time.

use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;

use crate::commands::CommandHandler;

/// Failure of a remote invocation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    /// The peer is reachable but does not implement the method
    #[error("Peer does not implement method '{method}'")]
    MethodNotFound { method: String },

    /// Connection-level failure; the session is no longer usable
    #[error("Transport failure: {0}")]
    Transport(String),
}

impl InvokeError {
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::MethodNotFound {
            method: method.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}

/// Opens sessions to hub URLs
#[async_trait]
pub trait HubConnector: Send + Sync + Debug {
    async fn connect(
        &self,
        url: &str,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<Box<dyn HubSession>, InvokeError>;
}

/// One live connection to a hub
#[async_trait]
pub trait HubSession: Send + Sync {
    /// Invoke `method` on the peer with a JSON payload
    async fn invoke(&self, method: &str, payload: serde_json::Value) -> Result<(), InvokeError>;

    /// Resolves once the underlying transport has closed
    async fn closed(&self);

    /// Close the session from this side
    async fn close(&self);
}
