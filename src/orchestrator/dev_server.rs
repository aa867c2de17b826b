//! Dev-server lifecycle management.
//!
//! Each session owns at most one dev server. A server is launched through
//! the user's login shell in its own process group, receives its assigned
//! port through the environment, and moves through
//! `starting → running → {stopped, error}`. Output is captured into the
//! shared [`LogManager`] and scanned for a ready URL.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::DevServerConfig;
use crate::log_manager::LogManager;
use crate::models::log::LogStream;
use crate::models::server::{LaunchSpec, ManagedServer, ServerStatus, ServerStatusEntry};
use crate::models::SessionId;
use crate::orchestrator::child_events::{self, ChildEvent};
use crate::orchestrator::url_detector::{detect_url, fallback_url};
use crate::ports::manager::PortManager;
use crate::ports::scanner::PortScanner;
use crate::process::signal;
use crate::{AppError, Result};

/// How long to wait for output pipes to drain after the shell exits.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Capacity of the server event broadcast channel.
const EVENT_CAPACITY: usize = 128;

/// Lifecycle notification published by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A server moved to a new status.
    StatusChanged {
        /// Owning session.
        session_id: SessionId,
        /// New status.
        status: ServerStatus,
    },
    /// A ready URL was detected or synthesized.
    UrlDetected {
        /// Owning session.
        session_id: SessionId,
        /// Reachable URL.
        url: String,
    },
    /// The server process exited.
    Exited {
        /// Owning session.
        session_id: SessionId,
        /// Exit code; `None` when terminated by a signal.
        exit_code: Option<i32>,
    },
}

struct ServerRecord {
    server: ManagedServer,
    launch: LaunchSpec,
    generation: u64,
    stopping: bool,
    kill: Option<CancellationToken>,
    exited: watch::Sender<bool>,
}

struct Inner {
    config: DevServerConfig,
    ports: Arc<PortManager>,
    logs: Arc<LogManager>,
    scanner: Arc<PortScanner>,
    records: Mutex<HashMap<SessionId, ServerRecord>>,
    events: broadcast::Sender<ServerEvent>,
    generations: AtomicU64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, ServerRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: ServerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Move `record` to `next` if the state machine allows it.
    fn transition(&self, record: &mut ServerRecord, next: ServerStatus) -> bool {
        let current = record.server.status;
        if !current.can_transition_to(next) {
            debug!(
                session_id = record.server.session_id,
                ?current,
                ?next,
                "ignoring status transition"
            );
            return false;
        }
        record.server.status = next;
        info!(
            session_id = record.server.session_id,
            status = ?next,
            "dev server status changed"
        );
        self.emit(ServerEvent::StatusChanged {
            session_id: record.server.session_id,
            status: next,
        });
        true
    }

    /// Record the ready URL and flip to running. Only the first call per
    /// start has any effect.
    fn mark_running(&self, session_id: SessionId, generation: u64, url: String) {
        let mut records = self.lock();
        let Some(record) = records.get_mut(&session_id) else {
            return;
        };
        if record.generation != generation || record.server.detected_url.is_some() {
            return;
        }
        if self.transition(record, ServerStatus::Running) {
            record.server.detected_url = Some(url.clone());
            info!(session_id, url = %url, "dev server ready");
            self.emit(ServerEvent::UrlDetected { session_id, url });
        }
    }

    /// Fail a start attempt before the child was running.
    fn fail_start(&self, session_id: SessionId, generation: u64) {
        let mut records = self.lock();
        if let Some(record) = records.get_mut(&session_id) {
            if record.generation == generation {
                record.server.stopped_at = Some(Utc::now());
                self.transition(record, ServerStatus::Error);
                record.exited.send_replace(true);
                self.ports.release_port(session_id);
            }
        }
    }

    /// Append an output line from run `generation`. Lines from a
    /// superseded run are dropped; returns whether the line was kept.
    fn append_log(&self, session_id: SessionId, generation: u64, stream: LogStream, line: &str) -> bool {
        let records = self.lock();
        let current = records
            .get(&session_id)
            .is_some_and(|r| r.generation == generation);
        if current {
            self.logs.append(session_id, stream, line);
        }
        current
    }

    fn handle_exit(&self, session_id: SessionId, generation: u64, pid: Option<u32>, code: Option<i32>) {
        if let Some(pid) = pid {
            self.scanner.unregister_managed_pid(pid);
        }

        let mut records = self.lock();
        let Some(record) = records.get_mut(&session_id) else {
            return;
        };
        if record.generation != generation {
            // A newer start owns the record and the port.
            return;
        }

        if record.server.status.is_live() {
            let next = if record.stopping || code == Some(0) {
                ServerStatus::Stopped
            } else {
                ServerStatus::Error
            };
            record.server.stopped_at = Some(Utc::now());
            record.server.exit_code = code;
            record.kill = None;
            self.transition(record, next);
            self.emit(ServerEvent::Exited {
                session_id,
                exit_code: code,
            });
        }
        record.exited.send_replace(true);
        // Under the records lock, so a new start never inherits a port that
        // is about to be freed.
        self.ports.release_port(session_id);
    }

    async fn supervise(
        self: Arc<Self>,
        session_id: SessionId,
        generation: u64,
        pid: Option<u32>,
        port: u16,
        mut events: mpsc::Receiver<ChildEvent>,
    ) {
        let grace = tokio::time::sleep(self.config.ready_grace());
        tokio::pin!(grace);
        let mut url_settled = false;

        loop {
            tokio::select! {
                () = &mut grace, if !url_settled => {
                    url_settled = true;
                    debug!(session_id, port, "no ready url within grace, assuming up");
                    self.mark_running(session_id, generation, fallback_url(port));
                }
                event = events.recv() => match event {
                    Some(ChildEvent::Stdout(line)) => {
                        let kept = self.append_log(session_id, generation, LogStream::Stdout, &line);
                        if kept && !url_settled {
                            if let Some(url) = detect_url(&line) {
                                url_settled = true;
                                self.mark_running(session_id, generation, url);
                            }
                        }
                    }
                    Some(ChildEvent::Stderr(line)) => {
                        self.append_log(session_id, generation, LogStream::Stderr, &line);
                    }
                    Some(ChildEvent::Exited(code)) => {
                        info!(session_id, ?pid, ?code, "dev server exited");
                        self.handle_exit(session_id, generation, pid, code);
                        return;
                    }
                    None => {
                        warn!(session_id, "child event stream closed without exit");
                        self.handle_exit(session_id, generation, pid, None);
                        return;
                    }
                }
            }
        }
    }
}

/// Owns every session's dev server.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DevServerManager {
    inner: Arc<Inner>,
}

impl DevServerManager {
    /// Construct a manager over shared port, log, and scanner components.
    #[must_use]
    pub fn new(
        config: DevServerConfig,
        ports: Arc<PortManager>,
        logs: Arc<LogManager>,
        scanner: Arc<PortScanner>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                ports,
                logs,
                scanner,
                records: Mutex::new(HashMap::new()),
                events,
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Launch a dev server for `session_id`.
    ///
    /// # Errors
    ///
    /// - `AppError::AlreadyRunning` if the session's server is live.
    /// - `AppError::PortsExhausted` if no port can be assigned.
    /// - `AppError::Process` if the shell cannot be spawned.
    pub async fn start_process(
        &self,
        session_id: SessionId,
        launch: LaunchSpec,
    ) -> Result<ServerStatusEntry> {
        let inner = &self.inner;
        let generation = inner.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let span = info_span!("start_process", session_id, generation);

        {
            let mut records = inner.lock();
            if records
                .get(&session_id)
                .is_some_and(|r| r.server.status.is_live())
            {
                return Err(AppError::AlreadyRunning(format!(
                    "session {session_id} already has a live dev server"
                )));
            }

            let (exited, _) = watch::channel(false);
            records.insert(
                session_id,
                ServerRecord {
                    server: ManagedServer {
                        session_id,
                        pid: None,
                        command: launch.command.clone(),
                        working_directory: launch.working_directory.clone(),
                        port: None,
                        status: ServerStatus::Starting,
                        detected_url: None,
                        started_at: Utc::now(),
                        stopped_at: None,
                        exit_code: None,
                    },
                    launch: launch.clone(),
                    generation,
                    stopping: false,
                    kill: None,
                    exited,
                },
            );
        }
        inner.emit(ServerEvent::StatusChanged {
            session_id,
            status: ServerStatus::Starting,
        });

        let port = match inner.ports.assign_port(session_id, launch.preferred_port) {
            Ok(port) => port,
            Err(err) => {
                span.in_scope(|| warn!(%err, "port assignment failed"));
                inner.fail_start(session_id, generation);
                return Err(err);
            }
        };

        let shell = inner.config.resolved_shell();
        let mut cmd = Command::new(&shell);
        cmd.args(&inner.config.shell_args)
            .arg(&launch.command)
            .current_dir(&launch.working_directory)
            .envs(&launch.env)
            .env(&inner.config.port_env_var, port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                span.in_scope(|| warn!(%err, shell = %shell, "failed to spawn dev server"));
                inner.fail_start(session_id, generation);
                return Err(AppError::Process(format!(
                    "failed to spawn dev server for session {session_id}: {err}"
                )));
            }
        };

        let attached = child_events::attach(child, DRAIN_TIMEOUT);
        let pid = attached.pid;
        if let Some(pid) = pid {
            inner.scanner.register_managed_pid(pid);
        }

        let entry = {
            let mut records = inner.lock();
            let Some(record) = records.get_mut(&session_id) else {
                return Err(AppError::NotFound(format!("session {session_id} vanished")));
            };
            record.server.pid = pid;
            record.server.port = Some(port);
            record.kill = Some(attached.kill);
            record.server.status_entry(Utc::now())
        };

        span.in_scope(|| info!(?pid, port, command = %launch.command, "dev server spawned"));

        tokio::spawn(
            Arc::clone(inner)
                .supervise(session_id, generation, pid, port, attached.events)
                .instrument(info_span!("dev_server", session_id)),
        );

        Ok(entry)
    }

    /// Stop a session's dev server: SIGTERM to its group, SIGKILL after the
    /// stop grace. The port is released once the exit is confirmed; if it
    /// never is, the assignment stays until the late exit is handled.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session.
    pub async fn stop_process(&self, session_id: SessionId) -> Result<()> {
        let inner = &self.inner;
        let (generation, pid, kill, mut exited) = {
            let mut records = inner.lock();
            let record = records.get_mut(&session_id).ok_or_else(|| {
                AppError::NotFound(format!("no dev server for session {session_id}"))
            })?;
            if !record.server.status.is_live() {
                inner.ports.release_port(session_id);
                return Ok(());
            }
            record.stopping = true;
            (
                record.generation,
                record.server.pid,
                record.kill.clone(),
                record.exited.subscribe(),
            )
        };

        info!(session_id, ?pid, "stopping dev server");
        if let Some(pid) = pid {
            if let Err(err) = signal::terminate_group(pid) {
                warn!(session_id, pid, %err, "SIGTERM failed");
            }
        }

        let grace = inner.config.stop_grace();
        if tokio::time::timeout(grace, exited.wait_for(|done| *done))
            .await
            .is_err()
        {
            warn!(session_id, ?pid, "dev server ignored SIGTERM, killing");
            if let Some(pid) = pid {
                if let Err(err) = signal::kill_group(pid) {
                    warn!(session_id, pid, %err, "SIGKILL failed");
                }
            }
            if let Some(kill) = kill {
                kill.cancel();
            }
            // The supervisor reports exit only after its bounded output drain.
            let confirm = grace.max(DRAIN_TIMEOUT * 2);
            if tokio::time::timeout(confirm, exited.wait_for(|done| *done))
                .await
                .is_err()
            {
                warn!(session_id, ?pid, "dev server did not report exit, keeping its port");
                return Ok(());
            }
        }

        let records = inner.lock();
        if records
            .get(&session_id)
            .is_some_and(|r| r.generation == generation && !r.server.status.is_live())
        {
            inner.ports.release_port(session_id);
        }
        Ok(())
    }

    /// Stop (if live) and start again with the same launch parameters. The
    /// previously assigned port is tried first and the session's logs are
    /// cleared.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session, or any error
    /// from [`Self::start_process`].
    pub async fn restart_process(&self, session_id: SessionId) -> Result<ServerStatusEntry> {
        let (launch, previous_port, live) = {
            let records = self.inner.lock();
            let record = records.get(&session_id).ok_or_else(|| {
                AppError::NotFound(format!("no dev server for session {session_id}"))
            })?;
            (
                record.launch.clone(),
                record.server.port,
                record.server.status.is_live(),
            )
        };

        if live {
            self.stop_process(session_id).await?;
        }
        self.inner.logs.clear(session_id);

        let launch = LaunchSpec {
            preferred_port: previous_port.or(launch.preferred_port),
            ..launch
        };
        self.start_process(session_id, launch).await
    }

    /// Current view of one session's server.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown session.
    pub fn status(&self, session_id: SessionId) -> Result<ServerStatusEntry> {
        self.inner
            .lock()
            .get(&session_id)
            .map(|r| r.server.status_entry(Utc::now()))
            .ok_or_else(|| AppError::NotFound(format!("no dev server for session {session_id}")))
    }

    /// Full record of one session's server, if any.
    #[must_use]
    pub fn server(&self, session_id: SessionId) -> Option<ManagedServer> {
        self.inner.lock().get(&session_id).map(|r| r.server.clone())
    }

    /// Views of every known server, sorted by session id.
    #[must_use]
    pub fn list(&self) -> Vec<ServerStatusEntry> {
        let now = Utc::now();
        let mut entries: Vec<ServerStatusEntry> = self
            .inner
            .lock()
            .values()
            .map(|r| r.server.status_entry(now))
            .collect();
        entries.sort_by_key(|e| e.session_id);
        entries
    }

    /// Stop every live server.
    pub async fn stop_all(&self) {
        let live: Vec<SessionId> = self
            .inner
            .lock()
            .values()
            .filter(|r| r.server.status.is_live())
            .map(|r| r.server.session_id)
            .collect();

        for session_id in live {
            if let Err(err) = self.stop_process(session_id).await {
                warn!(session_id, %err, "failed to stop dev server");
            }
        }
    }

    /// Subscribe to lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.events.subscribe()
    }

    /// Shared log buffers.
    #[must_use]
    pub fn logs(&self) -> &Arc<LogManager> {
        &self.inner.logs
    }

    /// Shared port pool.
    #[must_use]
    pub fn ports(&self) -> &Arc<PortManager> {
        &self.inner.ports
    }
}
