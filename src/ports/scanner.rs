//! System-wide listening-socket scanner.
//!
//! Periodically runs an introspection command (`lsof` by default) that
//! lists every listening TCP socket, normalizes the rows, and keeps the
//! last snapshot. The change callback fires only when the set of
//! `(port, pid)` pairs differs from the previous scan. When the command is
//! missing or fails, the scanner keeps serving the last good snapshot and
//! reports itself as degraded until a scan succeeds again.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::ops::RangeInclusive;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::{PortConfig, ScannerConfig};
use crate::models::process::SystemProcess;
use crate::{AppError, Result};

/// Normalized wildcard bind address.
pub const WILDCARD_ADDRESS: &str = "*";
/// Normalized loopback bind address.
pub const LOOPBACK_ADDRESS: &str = "localhost";

/// Callback invoked with the new snapshot when the key set changes.
pub type ChangeCallback = Arc<dyn Fn(&[SystemProcess]) + Send + Sync>;

/// Source of raw listening-socket rows.
pub trait ListenerSource: Send + Sync {
    /// List every listening TCP socket. Rows are returned unmanaged.
    fn list_listeners(&self) -> Pin<Box<dyn Future<Output = Result<Vec<SystemProcess>>> + Send + '_>>;
}

/// [`ListenerSource`] that runs `lsof` (or a compatible command).
#[derive(Debug, Clone)]
pub struct LsofSource {
    command: String,
    args: Vec<String>,
}

impl LsofSource {
    /// Source running `command args…`.
    #[must_use]
    pub fn new(command: String, args: Vec<String>) -> Self {
        Self { command, args }
    }

    /// Source configured from the scanner settings.
    #[must_use]
    pub fn from_config(config: &ScannerConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone())
    }
}

impl ListenerSource for LsofSource {
    fn list_listeners(&self) -> Pin<Box<dyn Future<Output = Result<Vec<SystemProcess>>> + Send + '_>> {
        Box::pin(async move {
            let output = Command::new(&self.command)
                .args(&self.args)
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|err| AppError::Scanner(format!("failed to run {}: {err}", self.command)))?;

            let stdout = String::from_utf8_lossy(&output.stdout);
            // lsof exits 1 with no output when nothing matches.
            if !output.status.success() && !(output.status.code() == Some(1) && stdout.trim().is_empty()) {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(AppError::Scanner(format!(
                    "{} exited with {}: {}",
                    self.command,
                    output.status,
                    stderr.trim()
                )));
            }

            Ok(parse_lsof_output(&stdout))
        })
    }
}

/// Map a raw bind host to `*`, `localhost`, or the literal address.
#[must_use]
pub fn normalize_address(host: &str) -> String {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    match bare {
        "*" | "0.0.0.0" | "::" => WILDCARD_ADDRESS.to_owned(),
        "127.0.0.1" | "::1" | "localhost" => LOOPBACK_ADDRESS.to_owned(),
        other => other.to_owned(),
    }
}

/// Parse tabular `lsof -nP -iTCP -sTCP:LISTEN` output.
///
/// Expected columns: `COMMAND PID USER FD TYPE DEVICE SIZE/OFF NODE NAME`.
/// The NAME column is located after the `TCP` node token so rows with a
/// blank DEVICE or SIZE/OFF still parse. Unparseable rows are skipped.
#[must_use]
pub fn parse_lsof_output(raw: &str) -> Vec<SystemProcess> {
    raw.lines()
        .filter(|line| !line.starts_with("COMMAND"))
        .filter_map(parse_lsof_line)
        .collect()
}

fn parse_lsof_line(line: &str) -> Option<SystemProcess> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 5 {
        return None;
    }
    let pid = fields[1].parse::<u32>().ok()?;
    let node_idx = fields.iter().rposition(|f| *f == "TCP")?;
    let name = fields.get(node_idx + 1)?;
    let (host, port) = name.rsplit_once(':')?;
    let port = port.parse::<u16>().ok()?;

    Some(SystemProcess {
        pid,
        command: fields[0].replace("\\x20", " "),
        port,
        address: normalize_address(host),
        user: fields[2].to_owned(),
        managed: false,
    })
}

/// Which rows the default presentation shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationFilter {
    dev_band: RangeInclusive<u16>,
    extra_bands: Vec<RangeInclusive<u16>>,
    database_ports: Vec<u16>,
}

impl PresentationFilter {
    /// Filter from the port pool range and scanner settings.
    #[must_use]
    pub fn from_config(ports: &PortConfig, scanner: &ScannerConfig) -> Self {
        Self {
            dev_band: ports.range(),
            extra_bands: scanner
                .extra_port_bands
                .iter()
                .map(|band| band[0]..=band[1])
                .collect(),
            database_ports: scanner.database_ports.clone(),
        }
    }

    /// Whether `row` is shown. Managed rows are always shown.
    #[must_use]
    pub fn includes(&self, row: &SystemProcess) -> bool {
        row.managed
            || self.dev_band.contains(&row.port)
            || self.extra_bands.iter().any(|band| band.contains(&row.port))
            || self.database_ports.contains(&row.port)
    }
}

#[derive(Default)]
struct ScanState {
    rows: Vec<SystemProcess>,
    keys: BTreeSet<(u16, u32)>,
    degraded: bool,
}

/// Periodic listening-socket scanner with change detection.
pub struct PortScanner {
    source: Arc<dyn ListenerSource>,
    filter: PresentationFilter,
    interval: Duration,
    managed: Mutex<HashSet<u32>>,
    state: Mutex<ScanState>,
    on_change: Mutex<Option<ChangeCallback>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PortScanner {
    /// Construct a scanner (does not start scanning yet).
    #[must_use]
    pub fn new(
        source: Arc<dyn ListenerSource>,
        filter: PresentationFilter,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            filter,
            interval,
            managed: Mutex::new(HashSet::new()),
            state: Mutex::new(ScanState::default()),
            on_change: Mutex::new(None),
        }
    }

    /// Install the change callback, replacing any previous one.
    pub fn set_on_change(&self, callback: ChangeCallback) {
        *lock(&self.on_change) = Some(callback);
    }

    /// Mark `pid` as spawned by the dev-server manager.
    pub fn register_managed_pid(&self, pid: u32) {
        lock(&self.managed).insert(pid);
    }

    /// Forget a managed PID.
    pub fn unregister_managed_pid(&self, pid: u32) {
        lock(&self.managed).remove(&pid);
    }

    /// Run one scan and update the cache.
    ///
    /// Returns whether the `(port, pid)` key set changed; the change
    /// callback has already been invoked when it did.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Scanner` when the source fails. The previous
    /// snapshot is kept and the scanner is flagged degraded.
    pub async fn scan_once(&self) -> Result<bool> {
        let raw = match self.source.list_listeners().await {
            Ok(rows) => rows,
            Err(err) => {
                let mut state = lock(&self.state);
                if !state.degraded {
                    warn!(%err, "port scan failed, serving last snapshot");
                }
                state.degraded = true;
                return Err(err);
            }
        };

        let mut seen = HashSet::new();
        let mut rows: Vec<SystemProcess> = raw.into_iter().filter(|r| seen.insert(r.port)).collect();
        rows.sort_by_key(|r| r.port);
        let keys: BTreeSet<(u16, u32)> = rows.iter().map(|r| (r.port, r.pid)).collect();

        let changed = {
            let mut state = lock(&self.state);
            if state.degraded {
                info!("port scan recovered");
            }
            state.degraded = false;
            let changed = state.keys != keys;
            state.rows = rows;
            state.keys = keys;
            changed
        };

        if changed {
            let snapshot = self.all();
            debug!(listeners = snapshot.len(), "listening sockets changed");
            let callback = lock(&self.on_change).clone();
            if let Some(callback) = callback {
                callback(&snapshot);
            }
        }

        Ok(changed)
    }

    /// Unfiltered last snapshot with current managed tags.
    #[must_use]
    pub fn all(&self) -> Vec<SystemProcess> {
        let managed = lock(&self.managed).clone();
        lock(&self.state)
            .rows
            .iter()
            .map(|row| SystemProcess {
                managed: managed.contains(&row.pid),
                ..row.clone()
            })
            .collect()
    }

    /// Last snapshot narrowed by the presentation filter.
    #[must_use]
    pub fn filtered(&self) -> Vec<SystemProcess> {
        self.all()
            .into_iter()
            .filter(|row| self.filter.includes(row))
            .collect()
    }

    /// Whether the last scan failed.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        lock(&self.state).degraded
    }

    /// Spawn the periodic scan loop.
    #[must_use]
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(self.interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            info!("port scanner shutting down");
                            break;
                        }
                        _ = ticker.tick() => {}
                    }
                    if let Err(err) = self.scan_once().await {
                        debug!(%err, "port scan failed");
                    }
                }
            }
            .instrument(info_span!("port_scanner")),
        )
    }
}
