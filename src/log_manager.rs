//! Bounded per-session capture of dev-server output.

use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;

use crate::models::log::{LogEntry, LogStream};
use crate::models::SessionId;

/// Default number of lines returned by [`LogManager::get_logs`].
pub const DEFAULT_QUERY_LINES: usize = 50;

/// Selection of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogQuery {
    /// Maximum number of most recent lines.
    pub lines: usize,
    /// Restrict to one stream; `None` returns both.
    pub stream: Option<LogStream>,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            lines: DEFAULT_QUERY_LINES,
            stream: None,
        }
    }
}

/// Prefixes applied by [`LogManager::get_logs_as_string`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderOptions {
    /// Prefix each line with its RFC 3339 capture time.
    pub timestamps: bool,
    /// Prefix each line with `[out]` or `[err]`.
    pub stream_tags: bool,
}

/// Ring buffer of output lines per session.
///
/// Appends split raw chunks into lines and evict oldest-first once a
/// session holds `capacity` lines.
#[derive(Debug)]
pub struct LogManager {
    capacity: usize,
    buffers: Mutex<HashMap<SessionId, VecDeque<LogEntry>>>,
}

impl LogManager {
    /// Create a manager retaining at most `capacity` lines per session.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffers: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, VecDeque<LogEntry>>> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a raw chunk of output. Empty lines are dropped.
    pub fn append(&self, session_id: SessionId, stream: LogStream, data: &str) {
        let now = Utc::now();
        let mut buffers = self.lock();
        let buffer = buffers.entry(session_id).or_default();

        for line in data.lines().filter(|l| !l.is_empty()) {
            buffer.push_back(LogEntry {
                timestamp: now,
                stream,
                line: line.to_owned(),
            });
        }
        while buffer.len() > self.capacity {
            buffer.pop_front();
        }
    }

    /// Most recent `query.lines` entries for a session, oldest first.
    #[must_use]
    pub fn get_logs(&self, session_id: SessionId, query: LogQuery) -> Vec<LogEntry> {
        let buffers = self.lock();
        let Some(buffer) = buffers.get(&session_id) else {
            return Vec::new();
        };

        let mut selected: Vec<LogEntry> = buffer
            .iter()
            .rev()
            .filter(|e| query.stream.is_none_or(|s| s == e.stream))
            .take(query.lines)
            .cloned()
            .collect();
        selected.reverse();
        selected
    }

    /// Render selected entries as newline-separated text.
    #[must_use]
    pub fn get_logs_as_string(
        &self,
        session_id: SessionId,
        query: LogQuery,
        render: RenderOptions,
    ) -> String {
        let mut out = String::new();
        for entry in self.get_logs(session_id, query) {
            if render.timestamps {
                let _ = write!(out, "{} ", entry.timestamp.to_rfc3339());
            }
            if render.stream_tags {
                let _ = write!(out, "[{}] ", entry.stream.tag());
            }
            out.push_str(&entry.line);
            out.push('\n');
        }
        out
    }

    /// Drop every retained line of a session.
    pub fn clear(&self, session_id: SessionId) {
        self.lock().remove(&session_id);
    }

    /// Number of retained lines of a session.
    #[must_use]
    pub fn len(&self, session_id: SessionId) -> usize {
        self.lock().get(&session_id).map_or(0, VecDeque::len)
    }

    /// Whether a session has no retained lines.
    #[must_use]
    pub fn is_empty(&self, session_id: SessionId) -> bool {
        self.len(session_id) == 0
    }
}
