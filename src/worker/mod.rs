//! # Worker Control Plane
//!
//! Everything that owns and drives workers:
//!
//! - [`state`]: lifecycle states and event types
//! - [`backend`]: the streaming backend contract plus the shared [`backend::BackendCore`]
//! - [`simulated`] / [`process`]: the bundled backends
//! - [`registry`]: backend name to constructor mapping
//! - [`controller`]: per-worker lifecycle owner with its watchdog
//! - [`manager`]: fleet operations behind the inbound commands

pub mod backend;
pub mod controller;
pub mod log_buffer;
pub mod manager;
pub mod process;
pub mod registry;
pub mod simulated;
pub mod state;

pub use backend::{BackendCallbacks, BackendCore, BackendOutcome, StreamingBackend};
pub use controller::{
    ControllerContext, ControllerSettings, WorkerController, IMAGE_UPDATE_MISSING,
};
pub use log_buffer::LogBuffer;
pub use manager::{ManagerSettings, WorkerManager};
pub use process::ProcessBackend;
pub use registry::{BackendConstructor, BackendContext, BackendRegistry};
pub use simulated::{SimulatedBackend, SimulatedSettings};
pub use state::{EventType, WorkerState};
