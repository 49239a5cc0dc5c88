//! Graceful shutdown: close the hub, cancel listeners, wait for them.

use std::time::Duration;

use switchboard_core::{Hub, close_code};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default time allowed for listener tasks to finish.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Close reason sent to every session when the server stops.
pub const SHUTDOWN_REASON: &str = "server shutting down";

/// Coordinates shutdown across the listeners and the hub.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Coordinator with the default timeout.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_SHUTDOWN_TIMEOUT)
    }

    /// Coordinator that waits at most `timeout` for tracked tasks.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            timeout,
        }
    }

    /// Token observed by the listener loops.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop accepting connections.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Full graceful shutdown.
    ///
    /// 1. Close the hub: every member gets a going-away close frame
    /// 2. Cancel the token so listeners stop accepting
    /// 3. Wait up to the timeout for `handles`, then abort stragglers
    pub async fn graceful_shutdown(&self, hub: &Hub, handles: Vec<JoinHandle<()>>) {
        match hub
            .close_with_message(close_code::GOING_AWAY, SHUTDOWN_REASON)
            .await
        {
            Ok(()) => debug!("hub closed"),
            Err(e) => debug!(error = %e, "hub already closed"),
        }

        self.shutdown();
        info!(
            task_count = handles.len(),
            timeout_ms = self.timeout.as_millis() as u64,
            "waiting for listeners to stop"
        );

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let drain = futures::future::join_all(handles);
        if tokio::time::timeout(self.timeout, drain).await.is_err() {
            warn!("shutdown timed out after {:?}, aborting remaining tasks", self.timeout);
            for abort in aborts {
                abort.abort();
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
