//! Cooperative cancellation for long-running sweeps and enrichment runs.
//!
//! A [`ShutdownCoordinator`] is created once by the binary, wired to Ctrl+C,
//! and handed explicitly to every component that may suspend (credential
//! waits, retry backoff, batch loops). Components check it between units of
//! work so a stop request never leaves a half-committed batch behind.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Shared handle to a shutdown coordinator.
pub type SharedShutdown = Arc<ShutdownCoordinator>;

/// Coordinates graceful shutdown across async tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    is_shutdown: AtomicBool,
    notify: Notify,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        Self {
            is_shutdown: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Create a new shared coordinator wrapped in [`Arc`].
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Request shutdown. Wakes every waiter exactly once.
    pub fn request_shutdown(&self) {
        if !self.is_shutdown.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is requested. Returns immediately if already set.
    pub async fn wait_for_shutdown(&self) {
        let notified = self.notify.notified();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }
}

/// Returns `true` when an optional handle has been tripped.
pub fn is_requested(shutdown: Option<&SharedShutdown>) -> bool {
    shutdown.map(|s| s.is_shutdown_requested()).unwrap_or(false)
}

/// Sleep for `duration` unless shutdown is requested first.
///
/// Returns `false` when the sleep was cut short by a stop request.
pub async fn sleep_or_shutdown(duration: Duration, shutdown: Option<&SharedShutdown>) -> bool {
    run_or_shutdown(tokio::time::sleep(duration), shutdown)
        .await
        .is_some()
}

/// Drive `fut` to completion unless shutdown is requested first.
pub async fn run_or_shutdown<F: Future>(fut: F, shutdown: Option<&SharedShutdown>) -> Option<F::Output> {
    match shutdown {
        Some(handle) => {
            if handle.is_shutdown_requested() {
                return None;
            }
            tokio::select! {
                out = fut => Some(out),
                _ = handle.wait_for_shutdown() => None,
            }
        }
        None => Some(fut.await),
    }
}
