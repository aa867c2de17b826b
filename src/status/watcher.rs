//! Reader-side status file watcher.
//!
//! Watches the directory that holds the status file (so rename-based
//! replacement is seen) and coalesces bursts of notifications into one
//! read. A slow poll covers the cases notifications cannot: the directory
//! not existing yet, watch setup failing, and the file being absent.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::StatusConfig;
use crate::models::status::StatusFile;
use crate::status::file::read_status_with_retry;

/// Buffered documents before the watcher waits on the consumer.
const DOCUMENT_BUFFER: usize = 16;

/// Whether a notify event touches the status file itself.
fn is_status_change(event: &Event, file_name: Option<&std::ffi::OsStr>) -> bool {
    let relevant_kind = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    relevant_kind
        && (event.paths.is_empty()
            || event
                .paths
                .iter()
                .any(|p| file_name.is_some() && p.file_name() == file_name))
}

fn try_watch(path: &Path, signal: &mpsc::UnboundedSender<()>) -> Option<RecommendedWatcher> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty())?;
    let file_name = path.file_name().map(std::ffi::OsStr::to_os_string);
    let signal = signal.clone();

    let mut watcher = notify::recommended_watcher(
        move |result: std::result::Result<Event, notify::Error>| match result {
            Ok(event) if is_status_change(&event, file_name.as_deref()) => {
                let _ = signal.send(());
            }
            Err(err) => warn!(%err, "status file watcher error"),
            _ => {}
        },
    )
    .map_err(|err| debug!(%err, "failed to create status watcher"))
    .ok()?;

    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|err| debug!(%err, dir = %dir.display(), "failed to watch status dir"))
        .ok()?;

    info!(path = %path.display(), "watching status file");
    Some(watcher)
}

struct WatchLoop {
    path: PathBuf,
    debounce: Duration,
    poll_interval: Duration,
    read_attempts: u32,
    read_backoff: Duration,
    out: mpsc::Sender<StatusFile>,
    last: Option<StatusFile>,
    present: bool,
}

impl WatchLoop {
    /// Read and forward the document if it changed. Returns `false` once
    /// the consumer is gone.
    async fn refresh(&mut self) -> bool {
        match read_status_with_retry(&self.path, self.read_attempts, self.read_backoff).await {
            Ok(Some(doc)) => {
                self.present = true;
                if self.last.as_ref() != Some(&doc) {
                    self.last = Some(doc.clone());
                    return self.out.send(doc).await.is_ok();
                }
            }
            Ok(None) => {
                self.present = false;
            }
            Err(err) => {
                // Mid-write or corrupt; the next notification or poll retries.
                debug!(%err, "status read failed");
                self.present = false;
            }
        }
        !self.out.is_closed()
    }

    async fn run(mut self, cancel: CancellationToken) {
        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<()>();
        let mut watcher = try_watch(&self.path, &signal_tx);

        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if !self.refresh().await {
            return;
        }

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("status watcher cancelled");
                    break;
                }
                Some(()) = signal_rx.recv() => {
                    tokio::time::sleep(self.debounce).await;
                    while signal_rx.try_recv().is_ok() {}
                    if !self.refresh().await {
                        break;
                    }
                }
                _ = poll.tick() => {
                    if watcher.is_none() {
                        watcher = try_watch(&self.path, &signal_tx);
                    }
                    if (watcher.is_none() || !self.present) && !self.refresh().await {
                        break;
                    }
                }
            }
        }

        drop(watcher);
    }
}

/// Running status watcher. Dropping it stops the watch.
pub struct StatusWatcher {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl StatusWatcher {
    /// Start watching `path`. Every distinct document read is delivered on
    /// the returned channel, starting with the current one if present.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn spawn(path: PathBuf, config: &StatusConfig) -> (Self, mpsc::Receiver<StatusFile>) {
        let (out, rx) = mpsc::channel(DOCUMENT_BUFFER);
        let cancel = CancellationToken::new();
        let state = WatchLoop {
            path,
            debounce: config.debounce(),
            poll_interval: config.poll_interval(),
            read_attempts: config.read_attempts,
            read_backoff: config.read_backoff(),
            out,
            last: None,
            present: false,
        };
        let task = tokio::spawn(
            state
                .run(cancel.clone())
                .instrument(info_span!("status_watcher")),
        );
        (
            Self {
                cancel,
                task: Some(task),
            },
            rx,
        )
    }

    /// Stop watching and wait for the task to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for StatusWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
