//! # Resilience Module
//!
//! Liveness supervision for long-running workers.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use engine_gateway::resilience::{RestartCheck, Watchdog, WatchdogOptions};
//! use uuid::Uuid;
//!
//! # async fn example() {
//! let watchdog = Watchdog::new(
//!     Uuid::new_v4(),
//!     WatchdogOptions::default(),
//!     || RestartCheck::healthy(),
//!     |reason| async move {
//!         tracing::warn!(%reason, "restarting");
//!         Ok(())
//!     },
//! );
//! watchdog.start().await;
//! # }
//! ```

pub mod watchdog;

pub use watchdog::{
    RestartCheck, Watchdog, WatchdogOptions, WatchdogStateChanged, WatchdogStatsSnapshot,
};
