//! Status file document exchanged between the service and UI processes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::process::SystemProcess;
use super::server::ServerStatusEntry;

/// Full status document. Always written and read as a whole.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusFile {
    /// Managed dev servers, sorted by session.
    pub servers: Vec<ServerStatusEntry>,
    /// Listening sockets after the presentation filter.
    pub system_processes: Vec<SystemProcess>,
    /// When the writer produced this document.
    pub updated_at: DateTime<Utc>,
    /// The last scan failed; `system_processes` may be stale.
    #[serde(default)]
    pub scanner_degraded: bool,
}

impl StatusFile {
    /// Empty document stamped with the current time.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            servers: Vec::new(),
            system_processes: Vec::new(),
            updated_at: Utc::now(),
            scanner_degraded: false,
        }
    }
}
