//! Activity classification model.

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Whether a process is doing work.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityLevel {
    /// CPU or I/O delta reached a threshold during the last interval.
    Active,
    /// Both deltas stayed below their thresholds.
    Inactive,
    /// Not enough samples, counters went backwards, or the process is gone.
    #[default]
    Unknown,
}

/// Point-in-time read of cumulative counters for one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceSnapshot {
    /// Cumulative user + system CPU time in milliseconds.
    pub cpu_time_ms: u64,
    /// Cumulative bytes read from disk.
    pub disk_read_bytes: u64,
    /// Cumulative bytes written to disk.
    pub disk_written_bytes: u64,
    /// When the snapshot was taken.
    pub taken_at: Instant,
}

impl ResourceSnapshot {
    /// Total disk traffic (read + written).
    #[must_use]
    pub fn io_bytes(&self) -> u64 {
        self.disk_read_bytes.saturating_add(self.disk_written_bytes)
    }
}

/// Thresholds an interval's deltas are compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityThresholds {
    /// CPU time in milliseconds.
    pub cpu_ms: u64,
    /// Disk traffic in bytes.
    pub io_bytes: u64,
}

impl ActivityThresholds {
    /// Classify the change between two snapshots of the same PID.
    ///
    /// Active when either delta reaches its threshold. A counter that went
    /// backwards (wrap or PID reuse) yields [`ActivityLevel::Unknown`].
    #[must_use]
    pub fn classify(&self, prev: &ResourceSnapshot, cur: &ResourceSnapshot) -> ActivityLevel {
        let (Some(cpu_delta), Some(io_delta)) = (
            cur.cpu_time_ms.checked_sub(prev.cpu_time_ms),
            cur.io_bytes().checked_sub(prev.io_bytes()),
        ) else {
            return ActivityLevel::Unknown;
        };

        if cpu_delta >= self.cpu_ms || io_delta >= self.io_bytes {
            ActivityLevel::Active
        } else {
            ActivityLevel::Inactive
        }
    }

    /// Scale both thresholds from a `base` interval to a shorter `window`.
    ///
    /// Thresholds never drop below one unit so a completely idle process
    /// cannot read as active.
    #[must_use]
    pub fn scaled(&self, window_ms: u64, base_ms: u64) -> Self {
        let base = base_ms.max(1);
        Self {
            cpu_ms: (self.cpu_ms.saturating_mul(window_ms) / base).max(1),
            io_bytes: (self.io_bytes.saturating_mul(window_ms) / base).max(1),
        }
    }
}

/// A PID under periodic observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedProcess {
    /// Observed process.
    pub pid: u32,
    /// Most recent successful snapshot.
    pub last_snapshot: Option<ResourceSnapshot>,
    /// Classification from the most recent tick.
    pub activity_level: ActivityLevel,
}

impl WatchedProcess {
    /// Start watching with no samples yet.
    #[must_use]
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            last_snapshot: None,
            activity_level: ActivityLevel::Unknown,
        }
    }
}
