//! Graceful shutdown of live connections.
//!
//! When the process is asked to stop, [`ShutdownCoordinator::shutdown`]:
//!
//! 1. stops registry admissions, so attempts still in flight are refused,
//! 2. takes one snapshot and closes each connection with
//!    `1001 Server shutting down`, evicting it,
//! 3. clears whatever is left in the registry,
//! 4. waits for connection tasks to finish, up to the drain timeout.
//!
//! Connection tasks are tracked with a [`TaskTracker`]; the coordinator
//! closes the tracker so that [`TaskTracker::wait`] resolves once every
//! tracked task has exited.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::close_code;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::registry::ConnectionRegistry;

/// Close reason sent to every connection during shutdown.
pub const SHUTDOWN_REASON: &str = "Server shutting down";

/// Outcome of a shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Connections that were sent a going-away close frame.
    pub closed: usize,

    /// Whether every connection task exited within the drain timeout.
    pub drained: bool,
}

/// Closes every live connection and waits for their tasks.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    registry: Arc<ConnectionRegistry>,
    tasks: TaskTracker,
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(registry: Arc<ConnectionRegistry>, tasks: TaskTracker, drain_timeout: Duration) -> Self {
        Self {
            registry,
            tasks,
            drain_timeout,
        }
    }

    /// Runs the shutdown sequence. Calling it again is harmless.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.registry.stop_admissions();

        let connections = self.registry.snapshot();
        info!(connections = connections.len(), "Closing connections for shutdown");

        let mut closed = 0;
        for connection in &connections {
            if connection.close(close_code::AWAY, SHUTDOWN_REASON) {
                closed += 1;
            }
            self.registry.evict(connection.id());
        }

        let leftover = self.registry.clear();
        if leftover > 0 {
            warn!(leftover, "Connections registered after the shutdown snapshot were dropped");
        }

        self.tasks.close();
        let drained = tokio::time::timeout(self.drain_timeout, self.tasks.wait())
            .await
            .is_ok();

        if drained {
            info!(closed, "All connection tasks finished");
        } else {
            warn!(
                closed,
                remaining = self.tasks.len(),
                drain_timeout_ms = self.drain_timeout.as_millis() as u64,
                "Connection tasks still running after drain timeout"
            );
        }

        ShutdownReport { closed, drained }
    }
}
