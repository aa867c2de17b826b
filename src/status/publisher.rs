//! Service-side status publishing.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::models::process::SystemProcess;
use crate::models::status::StatusFile;
use crate::orchestrator::dev_server::DevServerManager;
use crate::ports::scanner::PortScanner;
use crate::status::file::StatusWriter;
use crate::{AppError, Result};

/// Keeps the status file in step with the dev-server manager and scanner.
pub struct StatusPublisher {
    writer: Arc<StatusWriter>,
    servers: DevServerManager,
    scanner: Arc<PortScanner>,
    heartbeat: Duration,
}

impl StatusPublisher {
    /// Construct a publisher (does not write anything yet).
    #[must_use]
    pub fn new(
        writer: StatusWriter,
        servers: DevServerManager,
        scanner: Arc<PortScanner>,
        heartbeat: Duration,
    ) -> Self {
        Self {
            writer: Arc::new(writer),
            servers,
            scanner,
            heartbeat,
        }
    }

    /// Current full document.
    #[must_use]
    pub fn snapshot(&self) -> StatusFile {
        StatusFile {
            servers: self.servers.list(),
            system_processes: self.scanner.filtered(),
            updated_at: Utc::now(),
            scanner_degraded: self.scanner.is_degraded(),
        }
    }

    /// Write the current document.
    ///
    /// # Errors
    ///
    /// Returns the writer's error, or `AppError::Io` if the blocking write
    /// task panicked.
    pub async fn publish(&self) -> Result<()> {
        let doc = self.snapshot();
        let writer = Arc::clone(&self.writer);
        tokio::task::spawn_blocking(move || writer.write(&doc))
            .await
            .map_err(|err| AppError::Io(format!("status write task failed: {err}")))?
    }

    async fn publish_logged(&self, reason: &str) {
        match self.publish().await {
            Ok(()) => debug!(reason, "status file written"),
            Err(err) => warn!(%err, reason, "failed to write status file"),
        }
    }

    /// Spawn the publishing loop.
    ///
    /// Installs the scanner's change callback, writes an initial document,
    /// then rewrites on every server event, every scanner change, and each
    /// heartbeat. A final document is written on cancellation.
    #[must_use]
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let scanner_changed = Arc::new(Notify::new());
        let notify = Arc::clone(&scanner_changed);
        self.scanner
            .set_on_change(Arc::new(move |_: &[SystemProcess]| notify.notify_one()));
        let mut events = self.servers.subscribe();

        tokio::spawn(
            async move {
                info!(path = %self.writer.path().display(), "status publisher started");
                self.publish_logged("initial").await;

                let mut heartbeat = tokio::time::interval(self.heartbeat);
                heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
                heartbeat.tick().await;

                loop {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            self.publish_logged("shutdown").await;
                            info!("status publisher shutting down");
                            break;
                        }
                        event = events.recv() => match event {
                            Ok(_) | Err(RecvError::Lagged(_)) => {
                                self.publish_logged("server event").await;
                            }
                            Err(RecvError::Closed) => {
                                debug!("server event stream closed");
                                break;
                            }
                        },
                        () = scanner_changed.notified() => {
                            self.publish_logged("ports changed").await;
                        }
                        _ = heartbeat.tick() => {
                            self.publish_logged("heartbeat").await;
                        }
                    }
                }
            }
            .instrument(info_span!("status_publisher")),
        )
    }
}
