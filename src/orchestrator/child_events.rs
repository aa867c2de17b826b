//! Ordered event stream over a spawned child's output and exit.
//!
//! Each output pipe is read line-by-line by its own task. A supervisor
//! task waits for the child and delivers [`ChildEvent::Exited`] only after
//! both readers have drained, so no output line ever arrives after the
//! exit. Descendants that inherited the pipes can keep them open past the
//! child's exit; the drain wait is bounded for that reason.

use std::time::Duration;

use futures_util::future::join_all;
use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Longest accepted output line; longer lines are discarded.
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Buffered events per child before readers apply backpressure.
const EVENT_BUFFER: usize = 256;

/// One observation from a running child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildEvent {
    /// A line written to stdout.
    Stdout(String),
    /// A line written to stderr.
    Stderr(String),
    /// The child exited. `None` when it was terminated by a signal.
    Exited(Option<i32>),
}

/// Handle to an attached child.
#[derive(Debug)]
pub struct ChildEvents {
    /// OS process id, if the child had not already been reaped.
    pub pid: Option<u32>,
    /// Ordered events; closes after [`ChildEvent::Exited`].
    pub events: mpsc::Receiver<ChildEvent>,
    /// Cancel to force-kill the child.
    pub kill: CancellationToken,
}

/// Take ownership of `child` and turn its pipes and exit into events.
///
/// Must be called from within a Tokio runtime.
#[must_use]
pub fn attach(mut child: Child, drain_timeout: Duration) -> ChildEvents {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let kill = CancellationToken::new();
    let pid = child.id();

    let mut readers: Vec<JoinHandle<()>> = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(read_lines(stdout, tx.clone(), ChildEvent::Stdout)));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(read_lines(stderr, tx.clone(), ChildEvent::Stderr)));
    }

    let kill_token = kill.clone();
    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            () = kill_token.cancelled() => {
                if let Err(err) = child.start_kill() {
                    debug!(?pid, %err, "force kill failed");
                }
                child.wait().await
            }
        };

        let code = match status {
            Ok(status) => status.code(),
            Err(err) => {
                warn!(?pid, %err, "failed to wait for child");
                None
            }
        };

        let aborts: Vec<_> = readers.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(drain_timeout, join_all(readers)).await.is_err() {
            debug!(?pid, "output still open after exit, abandoning readers");
            for handle in aborts {
                handle.abort();
            }
        }

        let _ = tx.send(ChildEvent::Exited(code)).await;
    });

    ChildEvents {
        pid,
        events: rx,
        kill,
    }
}

async fn read_lines<R>(pipe: R, tx: mpsc::Sender<ChildEvent>, wrap: fn(String) -> ChildEvent)
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(pipe, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    while let Some(item) = framed.next().await {
        match item {
            Ok(line) => {
                if tx.send(wrap(line)).await.is_err() {
                    break;
                }
            }
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                debug!("output line too long, skipping");
            }
            Err(LinesCodecError::Io(err)) => {
                debug!(%err, "output pipe closed with error");
                break;
            }
        }
    }
}
