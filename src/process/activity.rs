//! Periodic activity classification of watched processes.
//!
//! Every poll interval the monitor snapshots each watched PID's cumulative
//! CPU and disk counters and classifies the delta against the previous
//! snapshot (see [`ActivityThresholds::classify`]). A PID reads
//! [`ActivityLevel::Unknown`] until two snapshots exist, when counters go
//! backwards, and once the process has exited.
//!
//! The polling task starts with the first watched PID and exits once the
//! watch set is empty again.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

use crate::config::ActivityConfig;
use crate::models::activity::{ActivityLevel, ActivityThresholds, ResourceSnapshot, WatchedProcess};
use crate::process::tree::{descendants_of, ProcessTable};

struct MonitorState {
    watched: HashMap<u32, WatchedProcess>,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    table: Arc<dyn ProcessTable>,
    thresholds: ActivityThresholds,
    poll_interval: Duration,
    probe_window: Duration,
    agent_names: Vec<String>,
    state: Mutex<MonitorState>,
    cancel: CancellationToken,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sample every watched PID once. Returns `false` when the watch set
    /// is empty, after clearing the task slot so a later
    /// `start_monitoring` spawns a fresh loop.
    fn tick(&self) -> bool {
        let pids: Vec<u32> = {
            let mut state = self.lock();
            if state.watched.is_empty() {
                state.task = None;
                return false;
            }
            state.watched.keys().copied().collect()
        };

        // Sample outside the lock; stop_monitoring may run meanwhile.
        let samples: Vec<(u32, Option<ResourceSnapshot>)> = pids
            .into_iter()
            .map(|pid| (pid, self.table.snapshot(pid)))
            .collect();

        let mut state = self.lock();
        for (pid, sample) in samples {
            if let Some(entry) = state.watched.get_mut(&pid) {
                apply_sample(entry, sample, &self.thresholds);
            }
        }
        true
    }

    async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    debug!("activity monitor cancelled");
                    return;
                }
                _ = ticker.tick() => {}
            }

            if !self.tick() {
                debug!("watch set empty, activity monitor stopping");
                return;
            }
        }
    }
}

/// Fold one sample into a watched entry.
fn apply_sample(
    entry: &mut WatchedProcess,
    sample: Option<ResourceSnapshot>,
    thresholds: &ActivityThresholds,
) {
    match sample {
        Some(cur) => {
            entry.activity_level = entry
                .last_snapshot
                .map_or(ActivityLevel::Unknown, |prev| thresholds.classify(&prev, &cur));
            entry.last_snapshot = Some(cur);
        }
        None => {
            // Gone. A reappearing PID is a different process and needs a
            // fresh baseline.
            entry.activity_level = ActivityLevel::Unknown;
            entry.last_snapshot = None;
        }
    }
}

fn is_agent_name(name: &str, agent_names: &[String]) -> bool {
    let base = name.strip_suffix(".exe").unwrap_or(name);
    agent_names.iter().any(|a| a.eq_ignore_ascii_case(base))
}

/// Watches PIDs and classifies each as active, inactive, or unknown.
///
/// Dropping the monitor cancels its polling task.
pub struct ActivityMonitor {
    inner: Arc<Inner>,
}

impl Drop for ActivityMonitor {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

impl ActivityMonitor {
    /// Construct a monitor over `table` (does not start polling yet).
    #[must_use]
    pub fn new(table: Arc<dyn ProcessTable>, config: &ActivityConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                table,
                thresholds: ActivityThresholds {
                    cpu_ms: config.cpu_threshold_ms,
                    io_bytes: config.io_threshold_bytes,
                },
                poll_interval: config.poll_interval(),
                probe_window: config.probe_window(),
                agent_names: config.agent_process_names.clone(),
                state: Mutex::new(MonitorState {
                    watched: HashMap::new(),
                    task: None,
                }),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Begin watching `pid`. Idempotent.
    ///
    /// Must be called from within a Tokio runtime: the first watched PID
    /// spawns the polling task.
    pub fn start_monitoring(&self, pid: u32) {
        let mut state = self.inner.lock();
        state
            .watched
            .entry(pid)
            .or_insert_with(|| WatchedProcess::new(pid));

        if state.task.is_none() {
            let inner = Arc::clone(&self.inner);
            state.task = Some(tokio::spawn(
                inner.run().instrument(info_span!("activity_monitor")),
            ));
            debug!(pid, "activity monitor started");
        }
    }

    /// Stop watching `pid`. Safe at any time, including mid-tick.
    pub fn stop_monitoring(&self, pid: u32) {
        let mut state = self.inner.lock();
        state.watched.remove(&pid);
        if state.watched.is_empty() {
            if let Some(task) = state.task.take() {
                task.abort();
                debug!("activity monitor torn down");
            }
        }
    }

    /// Latest classification for `pid`; unwatched PIDs are `Unknown`.
    #[must_use]
    pub fn activity_level(&self, pid: u32) -> ActivityLevel {
        self.inner
            .lock()
            .watched
            .get(&pid)
            .map_or(ActivityLevel::Unknown, |w| w.activity_level)
    }

    /// PIDs currently watched.
    #[must_use]
    pub fn watched_pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.inner.lock().watched.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    /// Whether the root or any agent-named descendant is doing work.
    ///
    /// A root already classified active short-circuits. Otherwise the root
    /// and every descendant whose executable name is on the agent list are
    /// probed live: two snapshots one probe window apart, compared against
    /// thresholds scaled down to that window. This catches a wrapper shell
    /// whose work happens in a child interpreter.
    ///
    /// Matching descendants by name is an approximation; an unrelated
    /// process that reuses a PID under a matching name can read as active.
    pub async fn is_process_tree_active(&self, root_pid: u32) -> bool {
        if self.activity_level(root_pid) == ActivityLevel::Active {
            return true;
        }

        let inner = &self.inner;
        let mut candidates = vec![root_pid];
        candidates.extend(
            descendants_of(&inner.table.processes(), root_pid)
                .into_iter()
                .filter(|node| is_agent_name(&node.name, &inner.agent_names))
                .map(|node| node.pid),
        );

        let baseline: Vec<(u32, ResourceSnapshot)> = candidates
            .iter()
            .filter_map(|&pid| inner.table.snapshot(pid).map(|snap| (pid, snap)))
            .collect();
        if baseline.is_empty() {
            return false;
        }

        tokio::time::sleep(inner.probe_window).await;

        let window_ms = u64::try_from(inner.probe_window.as_millis()).unwrap_or(u64::MAX);
        let base_ms = u64::try_from(inner.poll_interval.as_millis()).unwrap_or(u64::MAX);
        let scaled = inner.thresholds.scaled(window_ms, base_ms);

        baseline.iter().any(|(pid, prev)| {
            inner
                .table
                .snapshot(*pid)
                .is_some_and(|cur| scaled.classify(prev, &cur) == ActivityLevel::Active)
        })
    }
}
