//! Managed dev-server model and lifecycle helpers.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SessionId;

/// Lifecycle status for a managed dev server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    /// Spawned, waiting for a ready URL or the grace period.
    Starting,
    /// Reachable (detected or assumed).
    Running,
    /// Exited cleanly or stopped on request.
    Stopped,
    /// Exited with a non-zero code or failed to spawn.
    Error,
}

impl ServerStatus {
    /// Whether the process is still expected to be alive.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Starting, Self::Running | Self::Stopped | Self::Error)
                | (Self::Running, Self::Stopped | Self::Error)
                | (Self::Stopped | Self::Error, Self::Starting)
        )
    }
}

/// Parameters a dev server was started with, kept for restarts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Shell command line.
    pub command: String,
    /// Directory the command runs in.
    pub working_directory: PathBuf,
    /// Port to try first.
    pub preferred_port: Option<u16>,
    /// Extra environment for the child.
    pub env: HashMap<String, String>,
}

/// A dev server owned by the process manager. One per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedServer {
    /// Owning session.
    pub session_id: SessionId,
    /// Child PID once spawned.
    pub pid: Option<u32>,
    /// Shell command line.
    pub command: String,
    /// Directory the command runs in.
    pub working_directory: PathBuf,
    /// Assigned port.
    pub port: Option<u16>,
    /// Current lifecycle status.
    pub status: ServerStatus,
    /// URL detected from output or synthesized after the grace period.
    pub detected_url: Option<String>,
    /// Spawn time.
    pub started_at: DateTime<Utc>,
    /// Exit time.
    pub stopped_at: Option<DateTime<Utc>>,
    /// Exit code, when the process exited normally.
    pub exit_code: Option<i32>,
}

impl ManagedServer {
    /// Build the status-file row for this server as of `now`.
    #[must_use]
    pub fn status_entry(&self, now: DateTime<Utc>) -> ServerStatusEntry {
        let live = self.status.is_live();
        let uptime = live.then(|| {
            u64::try_from((now - self.started_at).num_seconds()).unwrap_or(0)
        });
        ServerStatusEntry {
            session_id: self.session_id,
            status: self.status,
            pid: self.pid.filter(|_| live),
            port: self.port.filter(|_| live),
            url: self.detected_url.clone().filter(|_| live),
            started_at: Some(self.started_at),
            uptime,
        }
    }
}

/// Status view of one server, as served to the UI and the status file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatusEntry {
    /// Owning session.
    pub session_id: SessionId,
    /// Lifecycle status.
    pub status: ServerStatus,
    /// Child PID while live.
    pub pid: Option<u32>,
    /// Assigned port while live.
    pub port: Option<u16>,
    /// Reachable URL while live.
    pub url: Option<String>,
    /// Spawn time.
    pub started_at: Option<DateTime<Utc>>,
    /// Seconds since spawn while live, else null.
    pub uptime: Option<u64>,
}
