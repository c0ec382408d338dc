//! # Hub Connectivity
//!
//! Everything between the global message queue and the upstream hubs:
//!
//! - [`transport`]: the remote-invoke contract transports implement
//! - [`routing`]: message kind to remote method mapping
//! - [`supervisor`]: one reconnecting session per hub URL
//! - [`manager`]: the set of supervisors plus the global fan-out loop
//! - [`tcp`]: JSON-lines TCP transport

pub mod manager;
pub mod routing;
pub mod supervisor;
pub mod tcp;
pub mod transport;

pub use manager::HubManager;
pub use routing::method_for;
pub use supervisor::{
    ConnectionState, ConnectionSupervisor, SessionSync, SupervisorSettings,
    SupervisorStatsSnapshot,
};
pub use tcp::{TcpHubConnector, TcpHubSession};
pub use transport::{HubConnector, HubSession, InvokeError};
