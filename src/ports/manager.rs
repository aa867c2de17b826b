//! Exclusive per-session port assignment.
//!
//! The port range is a single pool guarded by one mutex; no other
//! component hands out ports. Availability is tested by binding a
//! throwaway loopback listener and dropping it straight away.

use std::collections::HashMap;
use std::net::{Ipv4Addr, TcpListener};
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::models::SessionId;
use crate::{AppError, Result};

/// OS-level port availability check.
pub trait PortProbe: Send + Sync {
    /// Whether `port` can currently be bound.
    fn is_free(&self, port: u16) -> bool;
}

/// [`PortProbe`] that binds `127.0.0.1:<port>` and releases it immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct BindProbe;

impl PortProbe for BindProbe {
    fn is_free(&self, port: u16) -> bool {
        TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
    }
}

/// Tracks one port per session within a configured range.
pub struct PortManager {
    range: RangeInclusive<u16>,
    probe: Arc<dyn PortProbe>,
    assigned: Mutex<HashMap<SessionId, u16>>,
}

impl PortManager {
    /// Manager over `range` using the bind-test probe.
    #[must_use]
    pub fn new(range: RangeInclusive<u16>) -> Self {
        Self::with_probe(range, Arc::new(BindProbe))
    }

    /// Manager over `range` with a custom availability probe.
    #[must_use]
    pub fn with_probe(range: RangeInclusive<u16>, probe: Arc<dyn PortProbe>) -> Self {
        Self {
            range,
            probe,
            assigned: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, u16>> {
        self.assigned.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Assign a port to `session_id`, or return the one it already holds.
    ///
    /// The preferred port is tried first when it is free and not held by
    /// another session (it may lie outside the range). Otherwise the range
    /// is scanned in order. The lock is held across probing so concurrent
    /// callers never receive the same port.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PortsExhausted` when no port in the range is free.
    pub fn assign_port(&self, session_id: SessionId, preferred: Option<u16>) -> Result<u16> {
        let mut assigned = self.lock();
        if let Some(&port) = assigned.get(&session_id) {
            return Ok(port);
        }

        let held = |port: u16, map: &HashMap<SessionId, u16>| map.values().any(|&p| p == port);

        let chosen = preferred
            .filter(|&p| p != 0 && !held(p, &assigned) && self.probe.is_free(p))
            .or_else(|| {
                self.range.clone().find(|&candidate| {
                    if held(candidate, &assigned) {
                        return false;
                    }
                    let free = self.probe.is_free(candidate);
                    if !free {
                        debug!(port = candidate, "port candidate in use");
                    }
                    free
                })
            })
            .ok_or_else(|| {
                AppError::PortsExhausted(format!(
                    "range {}-{} is fully used",
                    self.range.start(),
                    self.range.end()
                ))
            })?;

        assigned.insert(session_id, chosen);
        info!(session_id, port = chosen, "port assigned");
        Ok(chosen)
    }

    /// Release the port held by `session_id`. Idempotent.
    pub fn release_port(&self, session_id: SessionId) {
        if let Some(port) = self.lock().remove(&session_id) {
            info!(session_id, port, "port released");
        }
    }

    /// Port currently held by `session_id`.
    #[must_use]
    pub fn port_for(&self, session_id: SessionId) -> Option<u16> {
        self.lock().get(&session_id).copied()
    }

    /// All current assignments, sorted by session.
    #[must_use]
    pub fn assignments(&self) -> Vec<(SessionId, u16)> {
        let mut all: Vec<(SessionId, u16)> = self.lock().iter().map(|(&s, &p)| (s, p)).collect();
        all.sort_unstable();
        all
    }

    /// The configured range.
    #[must_use]
    pub fn range(&self) -> RangeInclusive<u16> {
        self.range.clone()
    }
}
