#![allow(clippy::doc_markdown)] // Allow technical terms like SignalR, JSON-lines in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Engine Gateway
//!
//! Edge engine that supervises streaming workers and forwards their telemetry to one or more
//! hubs.
//!
//! ## Overview
//!
//! An engine owns a set of **workers**. Each worker wraps a streaming backend (an external
//! process, or the bundled simulator) and is driven through a small lifecycle state machine
//! with a watchdog that restarts it when image frames stop arriving. Everything a worker
//! produces (state changes, log lines, image frames) is enriched with the engine id, a global
//! sequence number and a timestamp, then placed on a bounded multi-kind queue.
//!
//! Every configured hub gets its own **connection supervisor** with a private copy of that
//! queue. The supervisor keeps a session open, re-synchronises the hub on every reconnect
//! (system info plus a snapshot of all workers) and drains its queue in order. Hubs send
//! commands back over the same session (start, stop, create, edit, remove workers).
//!
//! ## Module Organization
//!
//! - [`bootstrap`] - Wires and owns every running component
//! - [`worker`] - Backends, controllers, the watchdog restart cycle and the worker manager
//! - [`messaging`] - Envelopes, sequence numbers and the bounded [`messaging::MultiQueue`]
//! - [`hub`] - Connection supervisors, method routing and the TCP transport
//! - [`commands`] - Inbound command parsing and dispatch
//! - [`repository`] - Persistence seam for workers, events and hub URLs
//! - [`resilience`] - The activity watchdog
//! - [`telemetry`] - System info and engine metrics
//! - [`config`] - YAML configuration with environment overrides
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use engine_gateway::{ConfigManager, GatewayBootstrap};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! engine_gateway::logging::init_structured_logging();
//!
//! let config = ConfigManager::load("config/engine-gateway.yaml")?;
//! let gateway = GatewayBootstrap::new(config).start().await?;
//!
//! tokio::signal::ctrl_c().await?;
//! gateway.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! ```

pub mod bootstrap;
pub mod commands;
pub mod config;
pub mod constants;
pub mod error;
pub mod hub;
pub mod logging;
pub mod messaging;
pub mod repository;
pub mod resilience;
pub mod telemetry;
pub mod worker;

pub use bootstrap::{EngineGateway, GatewayBootstrap};
pub use commands::{CommandHandler, CommandResult, CommandRouter, InboundCommand};
pub use config::{ConfigManager, GatewayConfig};
pub use error::{GatewayError, Result};
pub use hub::{HubConnector, HubManager, HubSession, InvokeError};
pub use messaging::{Envelope, MessageKind, MessagePayload, MultiQueue};
pub use repository::{InMemoryRepository, Repository, WorkerEntity};
pub use worker::{StreamingBackend, WorkerController, WorkerManager, WorkerState};
