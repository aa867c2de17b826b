//! Process tree enumeration.
//!
//! The OS process table is read once per query through a [`ProcessTable`]
//! and never cached: a stale table would misclassify activity after a
//! child exits or a PID is reused.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::debug;

use crate::models::activity::ResourceSnapshot;
use crate::models::process::{ProcessTreeNode, SessionProcessTree};
use crate::models::SessionId;

/// Read access to the OS process table.
///
/// Both methods swallow failures: an unreadable table is an empty list and
/// a vanished process is `None`.
pub trait ProcessTable: Send + Sync {
    /// Every process currently in the table.
    fn processes(&self) -> Vec<ProcessTreeNode>;

    /// Cumulative CPU and disk counters for one process.
    fn snapshot(&self, pid: u32) -> Option<ResourceSnapshot>;
}

/// [`ProcessTable`] backed by `sysinfo`.
pub struct SysinfoTable {
    system: Mutex<System>,
}

impl Default for SysinfoTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoTable {
    /// Create a table with nothing loaded yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl ProcessTable for SysinfoTable {
    fn processes(&self) -> Vec<ProcessTreeNode> {
        let Ok(mut system) = self.system.lock() else {
            debug!("process table mutex poisoned");
            return Vec::new();
        };
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().without_tasks(),
        );
        // Linux threads show up as tasks parented to their process.
        system
            .processes()
            .iter()
            .filter(|(_, process)| process.thread_kind().is_none())
            .map(|(pid, process)| ProcessTreeNode {
                pid: pid.as_u32(),
                parent_pid: process.parent().map(Pid::as_u32),
                name: process.name().to_string_lossy().into_owned(),
            })
            .collect()
    }

    fn snapshot(&self, pid: u32) -> Option<ResourceSnapshot> {
        let mut system = self.system.lock().ok()?;
        let sys_pid = Pid::from_u32(pid);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::nothing()
                .with_cpu()
                .with_disk_usage()
                .without_tasks(),
        );
        let process = system.process(sys_pid)?;
        let disk = process.disk_usage();
        Some(ResourceSnapshot {
            cpu_time_ms: process.accumulated_cpu_time(),
            disk_read_bytes: disk.total_read_bytes,
            disk_written_bytes: disk.total_written_bytes,
            taken_at: Instant::now(),
        })
    }
}

/// Breadth-first descendants of `root_pid` within `nodes`, excluding the root.
///
/// A visited set guards against parent cycles, which PID reuse can produce
/// in a table read mid-churn.
#[must_use]
pub fn descendants_of(nodes: &[ProcessTreeNode], root_pid: u32) -> Vec<ProcessTreeNode> {
    let mut children: HashMap<u32, Vec<&ProcessTreeNode>> = HashMap::new();
    for node in nodes {
        if let Some(parent) = node.parent_pid {
            if parent != node.pid {
                children.entry(parent).or_default().push(node);
            }
        }
    }

    let mut result = Vec::new();
    let mut visited = HashSet::from([root_pid]);
    let mut queue = VecDeque::from([root_pid]);

    while let Some(pid) = queue.pop_front() {
        let Some(kids) = children.get(&pid) else {
            continue;
        };
        for kid in kids {
            if visited.insert(kid.pid) {
                queue.push_back(kid.pid);
                result.push((*kid).clone());
            }
        }
    }

    result
}

/// Descendant queries over a shared [`ProcessTable`].
#[derive(Clone)]
pub struct ProcessTree {
    table: Arc<dyn ProcessTable>,
}

impl ProcessTree {
    /// Wrap a process table.
    #[must_use]
    pub fn new(table: Arc<dyn ProcessTable>) -> Self {
        Self { table }
    }

    /// The underlying table.
    #[must_use]
    pub fn table(&self) -> &Arc<dyn ProcessTable> {
        &self.table
    }

    /// Every process reachable from `root_pid`, excluding the root itself.
    #[must_use]
    pub fn descendants(&self, root_pid: u32) -> Vec<ProcessTreeNode> {
        descendants_of(&self.table.processes(), root_pid)
    }

    /// One tree per session from a single table read.
    ///
    /// Sessions whose root process is gone are omitted.
    #[must_use]
    pub fn session_trees(&self, sessions: &[(SessionId, u32)]) -> Vec<SessionProcessTree> {
        let nodes = self.table.processes();
        sessions
            .iter()
            .filter_map(|&(session_id, root_pid)| {
                let root = nodes.iter().find(|n| n.pid == root_pid)?.clone();
                Some(SessionProcessTree {
                    session_id,
                    root,
                    descendants: descendants_of(&nodes, root_pid),
                })
            })
            .collect()
    }
}
