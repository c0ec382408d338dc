//! # Watchdog
//!
//! Generic liveness monitor. It knows nothing about what it watches: it is given a health
//! predicate and an async restart action, waits a grace period after start, then evaluates
//! the predicate every check interval and restarts when asked to.
//!
//! Both delays are clamped to a minimum so a misconfigured worker cannot spin the loop.
//! Restart failures and panics are contained and logged; after every restart attempt the
//! registered `StateChanged` handlers run concurrently and are all awaited before the next
//! check.

use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::constants::{
    DEFAULT_WATCHDOG_CHECK_INTERVAL, DEFAULT_WATCHDOG_GRACE_TIME, MINIMUM_WATCHDOG_INTERVAL,
};
use crate::error::Result;

/// Outcome of a health evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartCheck {
    pub needs_restart: bool,
    pub reason: String,
}

impl RestartCheck {
    pub fn healthy() -> Self {
        Self {
            needs_restart: false,
            reason: String::new(),
        }
    }

    pub fn restart(reason: impl Into<String>) -> Self {
        Self {
            needs_restart: true,
            reason: reason.into(),
        }
    }
}

/// Raised after every restart attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogStateChanged {
    pub worker_id: Uuid,
    pub reason: String,
    pub restart_succeeded: bool,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// Timing and enablement of a watchdog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogOptions {
    pub grace_time: Duration,
    pub check_interval: Duration,
    pub minimum_interval: Duration,
    pub enabled: bool,
}

impl Default for WatchdogOptions {
    fn default() -> Self {
        Self {
            grace_time: DEFAULT_WATCHDOG_GRACE_TIME,
            check_interval: DEFAULT_WATCHDOG_CHECK_INTERVAL,
            minimum_interval: MINIMUM_WATCHDOG_INTERVAL,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WatchdogStatsSnapshot {
    pub checks: u64,
    pub restarts: u64,
    pub restart_failures: u64,
}

type CheckFn = Arc<dyn Fn() -> RestartCheck + Send + Sync>;
type RestartFn = Arc<dyn Fn(String) -> BoxFuture<'static, Result<()>> + Send + Sync>;
type StateChangedHandler =
    Arc<dyn Fn(WatchdogStateChanged) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct Timing {
    grace_time: Duration,
    check_interval: Duration,
}

struct WatchdogInner {
    worker_id: Uuid,
    check: CheckFn,
    restart: RestartFn,
    timing: Mutex<Timing>,
    minimum_interval: Duration,
    enabled: AtomicBool,
    running: AtomicBool,
    handlers: RwLock<Vec<StateChangedHandler>>,
    checks: AtomicU64,
    restarts: AtomicU64,
    restart_failures: AtomicU64,
}

impl WatchdogInner {
    fn clamp(&self, value: Duration) -> Duration {
        value.max(self.minimum_interval)
    }

    fn grace_time(&self) -> Duration {
        self.timing.lock().grace_time
    }

    fn check_interval(&self) -> Duration {
        self.timing.lock().check_interval
    }

    async fn raise_state_changed(&self, event: WatchdogStateChanged) {
        let handlers: Vec<StateChangedHandler> = self.handlers.read().clone();
        if handlers.is_empty() {
            return;
        }
        join_all(handlers.iter().map(|handler| handler(event.clone()))).await;
    }
}

pub struct Watchdog {
    inner: Arc<WatchdogInner>,
    run: tokio::sync::Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl Watchdog {
    pub fn new<C, R, Fut>(worker_id: Uuid, options: WatchdogOptions, check: C, restart: R) -> Self
    where
        C: Fn() -> RestartCheck + Send + Sync + 'static,
        R: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let minimum_interval = options.minimum_interval;
        let inner = WatchdogInner {
            worker_id,
            check: Arc::new(check),
            restart: Arc::new(move |reason| restart(reason).boxed()),
            timing: Mutex::new(Timing {
                grace_time: options.grace_time.max(minimum_interval),
                check_interval: options.check_interval.max(minimum_interval),
            }),
            minimum_interval,
            enabled: AtomicBool::new(options.enabled),
            running: AtomicBool::new(false),
            handlers: RwLock::new(Vec::new()),
            checks: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
            restart_failures: AtomicU64::new(0),
        };

        Self {
            inner: Arc::new(inner),
            run: tokio::sync::Mutex::new(None),
        }
    }

    /// Register a handler awaited after every restart attempt
    pub fn subscribe<H, Fut>(&self, handler: H)
    where
        H: Fn(WatchdogStateChanged) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner
            .handlers
            .write()
            .push(Arc::new(move |event| handler(event).boxed()));
    }

    /// Start monitoring; a running loop is stopped first
    pub async fn start(&self) {
        let mut run = self.run.lock().await;
        if let Some((cancel, handle)) = run.take() {
            cancel.cancel();
            let _ = handle.await;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Self::run_loop(self.inner.clone(), cancel.clone()));
        *run = Some((cancel, handle));
        self.inner.running.store(true, Ordering::SeqCst);

        debug!(
            worker_id = %self.inner.worker_id,
            grace_ms = self.inner.grace_time().as_millis() as u64,
            interval_ms = self.inner.check_interval().as_millis() as u64,
            "🐕 Watchdog started"
        );
    }

    /// Stop monitoring and wait for the loop to exit
    pub async fn stop(&self) {
        let mut run = self.run.lock().await;
        if let Some((cancel, handle)) = run.take() {
            cancel.cancel();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(worker_id = %self.inner.worker_id, error = %e, "Watchdog loop ended abnormally");
                }
            }
            debug!(worker_id = %self.inner.worker_id, "🐕 Watchdog stopped");
        }
        self.inner.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Applies from the next sleep of the running loop
    pub fn update_grace_time(&self, grace_time: Duration) {
        let clamped = self.inner.clamp(grace_time);
        self.inner.timing.lock().grace_time = clamped;
    }

    /// Applies from the next sleep of the running loop
    pub fn update_check_interval(&self, check_interval: Duration) {
        let clamped = self.inner.clamp(check_interval);
        self.inner.timing.lock().check_interval = clamped;
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn grace_time(&self) -> Duration {
        self.inner.grace_time()
    }

    pub fn check_interval(&self) -> Duration {
        self.inner.check_interval()
    }

    pub fn stats(&self) -> WatchdogStatsSnapshot {
        WatchdogStatsSnapshot {
            checks: self.inner.checks.load(Ordering::Relaxed),
            restarts: self.inner.restarts.load(Ordering::Relaxed),
            restart_failures: self.inner.restart_failures.load(Ordering::Relaxed),
        }
    }

    async fn run_loop(inner: Arc<WatchdogInner>, cancel: CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(inner.grace_time()) => {}
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(inner.check_interval()) => {}
            }

            if !inner.enabled.load(Ordering::SeqCst) {
                continue;
            }

            inner.checks.fetch_add(1, Ordering::Relaxed);
            let check = (inner.check)();
            if !check.needs_restart {
                continue;
            }

            warn!(
                worker_id = %inner.worker_id,
                reason = %check.reason,
                "🐕 Watchdog requesting restart"
            );
            inner.restarts.fetch_add(1, Ordering::Relaxed);

            // Spawned so a panicking restart action cannot take the loop down
            let restart = tokio::spawn((inner.restart)(check.reason.clone()));
            // A finished restart is still reported when a stop request raced it
            let outcome = tokio::select! {
                biased;
                outcome = restart => outcome,
                _ = cancel.cancelled() => return,
            };

            let (restart_succeeded, message) = match outcome {
                Ok(Ok(())) => {
                    info!(worker_id = %inner.worker_id, reason = %check.reason, "🐕 Watchdog restart issued");
                    (true, format!("Watchdog restarted worker: {}", check.reason))
                }
                Ok(Err(e)) => {
                    inner.restart_failures.fetch_add(1, Ordering::Relaxed);
                    error!(worker_id = %inner.worker_id, error = %e, "🐕 Watchdog restart failed");
                    (false, format!("Watchdog restart failed: {e}"))
                }
                Err(join_error) => {
                    inner.restart_failures.fetch_add(1, Ordering::Relaxed);
                    error!(worker_id = %inner.worker_id, error = %join_error, "🐕 Watchdog restart panicked");
                    (false, format!("Watchdog restart panicked: {join_error}"))
                }
            };

            inner
                .raise_state_changed(WatchdogStateChanged {
                    worker_id: inner.worker_id,
                    reason: check.reason,
                    restart_succeeded,
                    message,
                    occurred_at: Utc::now(),
                })
                .await;
        }
    }
}

impl fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watchdog")
            .field("worker_id", &self.inner.worker_id)
            .field("running", &self.is_running())
            .field("enabled", &self.is_enabled())
            .field("grace_time", &self.grace_time())
            .field("check_interval", &self.check_interval())
            .finish()
    }
}
