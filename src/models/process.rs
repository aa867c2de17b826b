//! Process table and listening-socket models.

use serde::{Deserialize, Serialize};

use super::SessionId;

/// One row of the OS process table. Recomputed per query, never cached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessTreeNode {
    /// Process ID.
    pub pid: u32,
    /// Parent process ID, if the OS reports one.
    pub parent_pid: Option<u32>,
    /// Executable name.
    pub name: String,
}

/// Root process and descendants of a session's shell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionProcessTree {
    /// Owning session.
    pub session_id: SessionId,
    /// Session root (normally the shell).
    pub root: ProcessTreeNode,
    /// Every process reachable from the root, breadth-first.
    pub descendants: Vec<ProcessTreeNode>,
}

/// A listening TCP socket found by the port scanner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SystemProcess {
    /// Owning process.
    pub pid: u32,
    /// Command name reported by the introspection tool.
    pub command: String,
    /// Listening port.
    pub port: u16,
    /// Normalized bind address: `*`, `localhost`, or the literal address.
    pub address: String,
    /// Owning user.
    pub user: String,
    /// Whether the PID was spawned by the dev-server manager.
    pub managed: bool,
}
