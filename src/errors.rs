//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
///
/// Transient conditions (a PID vanishing mid-sample, a port candidate
/// already bound, a status read racing a write) never surface as an
/// `AppError`; they are absorbed by the component that observes them.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Spawning or signalling a child process failed.
    Process(String),
    /// The session already has a live dev-server process.
    AlreadyRunning(String),
    /// Requested session or process does not exist.
    NotFound(String),
    /// Every port in the configured range is held or bound.
    PortsExhausted(String),
    /// Listening-socket introspection failed; the last-good snapshot is kept.
    Scanner(String),
    /// Status file could not be written, read, or parsed.
    StatusFile(String),
    /// Refused to act on a protected process.
    Protected(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Process(msg) => write!(f, "process: {msg}"),
            Self::AlreadyRunning(msg) => write!(f, "already running: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::PortsExhausted(msg) => write!(f, "no ports available: {msg}"),
            Self::Scanner(msg) => write!(f, "scanner: {msg}"),
            Self::StatusFile(msg) => write!(f, "status file: {msg}"),
            Self::Protected(msg) => write!(f, "protected: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::StatusFile(format!("invalid status document: {err}"))
    }
}
