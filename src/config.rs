//! Global configuration parsing and validation.
//!
//! Every tunable of the core lives here. The file is optional: each section
//! and each field carries a serde default, so an empty TOML document (or
//! [`GlobalConfig::default`]) yields a working configuration.

use std::fs;
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Activity classification tunables.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct ActivityConfig {
    /// Interval between resource snapshots of watched PIDs.
    pub poll_interval_ms: u64,
    /// Window between the two direct snapshots taken by a tree probe.
    pub probe_window_ms: u64,
    /// CPU time delta (ms) per poll interval at or above which a process is active.
    pub cpu_threshold_ms: u64,
    /// Disk I/O delta (bytes) per poll interval at or above which a process is active.
    pub io_threshold_bytes: u64,
    /// Executable names treated as agent interpreters when walking descendants.
    pub agent_process_names: Vec<String>,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            probe_window_ms: 100,
            cpu_threshold_ms: 10,
            io_threshold_bytes: 1024,
            agent_process_names: default_agent_process_names(),
        }
    }
}

fn default_agent_process_names() -> Vec<String> {
    [
        "claude", "codex", "gemini", "aider", "opencode", "node", "bun", "deno", "python",
        "python3",
    ]
    .iter()
    .map(|name| (*name).to_owned())
    .collect()
}

impl ActivityConfig {
    /// Poll interval as a [`Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Tree probe window as a [`Duration`].
    #[must_use]
    pub fn probe_window(&self) -> Duration {
        Duration::from_millis(self.probe_window_ms)
    }
}

/// Port pool bounds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct PortConfig {
    /// First port of the assignable range (inclusive).
    pub range_start: u16,
    /// Last port of the assignable range (inclusive).
    pub range_end: u16,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            range_start: 3000,
            range_end: 3099,
        }
    }
}

impl PortConfig {
    /// The assignable range.
    #[must_use]
    pub fn range(&self) -> RangeInclusive<u16> {
        self.range_start..=self.range_end
    }
}

/// Listening-socket scanner tunables.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct ScannerConfig {
    /// Interval between scans.
    pub interval_ms: u64,
    /// Introspection program.
    pub command: String,
    /// Arguments passed to the introspection program.
    pub args: Vec<String>,
    /// Port bands shown by the presentation filter besides the dev band.
    pub extra_port_bands: Vec<[u16; 2]>,
    /// Well-known database ports shown by the presentation filter.
    pub database_ports: Vec<u16>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 3000,
            command: "lsof".into(),
            args: vec![
                "-nP".into(),
                "-iTCP".into(),
                "-sTCP:LISTEN".into(),
            ],
            extra_port_bands: vec![[5000, 5999], [8000, 8999]],
            database_ports: vec![3306, 5432, 6379, 27017],
        }
    }
}

impl ScannerConfig {
    /// Scan interval as a [`Duration`].
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Per-session log buffer tunables.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct LogConfig {
    /// Maximum number of retained lines per session.
    pub capacity: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { capacity: 1000 }
    }
}

/// Dev-server lifecycle tunables.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct DevServerConfig {
    /// How long to wait for a ready URL before assuming the server is up.
    pub ready_grace_ms: u64,
    /// How long to wait after SIGTERM before force-killing.
    pub stop_grace_ms: u64,
    /// Login shell used to run commands; `None` resolves `$SHELL`, then `/bin/sh`.
    pub shell: Option<String>,
    /// Flags passed to the shell before the command line.
    pub shell_args: Vec<String>,
    /// Environment variable carrying the assigned port.
    pub port_env_var: String,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            ready_grace_ms: 3000,
            stop_grace_ms: 5000,
            shell: None,
            shell_args: vec!["-l".into(), "-i".into(), "-c".into()],
            port_env_var: "PORT".into(),
        }
    }
}

impl DevServerConfig {
    /// Ready grace period as a [`Duration`].
    #[must_use]
    pub fn ready_grace(&self) -> Duration {
        Duration::from_millis(self.ready_grace_ms)
    }

    /// Stop grace period as a [`Duration`].
    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    /// Resolve the shell used to launch commands.
    #[must_use]
    pub fn resolved_shell(&self) -> String {
        self.shell
            .clone()
            .or_else(|| std::env::var("SHELL").ok().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| "/bin/sh".into())
    }
}

/// Status file exchange tunables.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct StatusConfig {
    /// Coalescing window for change notifications on the reader side.
    pub debounce_ms: u64,
    /// Reader fallback polling interval.
    pub poll_interval_ms: u64,
    /// Read attempts before a parse failure is reported.
    pub read_attempts: u32,
    /// Delay between read attempts (multiplied by the attempt number).
    pub read_backoff_ms: u64,
    /// Writer heartbeat so uptime values stay fresh.
    pub heartbeat_ms: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            poll_interval_ms: 2000,
            read_attempts: 3,
            read_backoff_ms: 50,
            heartbeat_ms: 5000,
        }
    }
}

impl StatusConfig {
    /// Debounce window as a [`Duration`].
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Poll interval as a [`Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Read backoff unit as a [`Duration`].
    #[must_use]
    pub fn read_backoff(&self) -> Duration {
        Duration::from_millis(self.read_backoff_ms)
    }

    /// Writer heartbeat as a [`Duration`].
    #[must_use]
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct GlobalConfig {
    /// Activity monitor settings.
    pub activity: ActivityConfig,
    /// Port pool settings.
    pub ports: PortConfig,
    /// Port scanner settings.
    pub scanner: ScannerConfig,
    /// Log buffer settings.
    pub logs: LogConfig,
    /// Dev-server lifecycle settings.
    pub dev_server: DevServerConfig,
    /// Status file exchange settings.
    pub status: StatusConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.ports.range_start == 0 || self.ports.range_start > self.ports.range_end {
            return Err(AppError::Config(format!(
                "port range {}-{} is empty or inverted",
                self.ports.range_start, self.ports.range_end
            )));
        }

        if self.activity.poll_interval_ms == 0
            || self.scanner.interval_ms == 0
            || self.status.poll_interval_ms == 0
        {
            return Err(AppError::Config("intervals must be greater than zero".into()));
        }

        if self.logs.capacity == 0 {
            return Err(AppError::Config(
                "logs.capacity must be greater than zero".into(),
            ));
        }

        if self.status.read_attempts == 0 {
            return Err(AppError::Config(
                "status.read_attempts must be greater than zero".into(),
            ));
        }

        if let Some(band) = self.scanner.extra_port_bands.iter().find(|b| b[0] > b[1]) {
            return Err(AppError::Config(format!(
                "scanner port band {}-{} is inverted",
                band[0], band[1]
            )));
        }

        if self.scanner.command.trim().is_empty() {
            return Err(AppError::Config("scanner.command must not be empty".into()));
        }

        Ok(())
    }
}
