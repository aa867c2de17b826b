#![forbid(unsafe_code)]

//! `session-warden-ctl` — local companion for `session-warden`.
//!
//! Reads the status file the service publishes, inspects process trees
//! and activity, and kills stray processes. Managed dev servers are only
//! ever stopped by the service that owns them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use session_warden::config::GlobalConfig;
use session_warden::models::status::StatusFile;
use session_warden::process::activity::ActivityMonitor;
use session_warden::process::signal::kill_process;
use session_warden::process::tree::{ProcessTree, SysinfoTable};
use session_warden::status::file::read_status_with_retry;
use session_warden::status::paths::default_status_path;
use session_warden::status::watcher::StatusWatcher;
use session_warden::{AppError, Result};

/// Grace between SIGTERM and SIGKILL for `kill`.
const KILL_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Parser)]
#[command(
    name = "session-warden-ctl",
    about = "Local CLI for the session-warden service",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Status file to read; defaults to the per-user location.
    #[arg(long)]
    status_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the current status document.
    Show {
        /// Emit raw JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Print the status document every time it changes.
    Watch,

    /// List the descendants of a process.
    Tree {
        /// Root process id.
        pid: u32,
    },

    /// Sample a process's activity.
    Activity {
        /// Process id to watch.
        pid: u32,

        /// Number of poll intervals to report.
        #[arg(long, default_value_t = 4)]
        samples: u32,
    },

    /// Terminate a stray process (SIGTERM, then SIGKILL).
    Kill {
        /// Process id to kill.
        pid: u32,
    },
}

fn main() {
    let args = Cli::parse();

    let result = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))
        .and_then(|rt| rt.block_on(run(args)));

    if let Err(err) = result {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

async fn run(args: Cli) -> Result<()> {
    let config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    let status_path = args.status_file.unwrap_or_else(default_status_path);

    match args.command {
        Command::Show { json } => {
            let doc = read_status_with_retry(
                &status_path,
                config.status.read_attempts,
                config.status.read_backoff(),
            )
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "no status file at {}; is session-warden running?",
                    status_path.display()
                ))
            })?;
            if json {
                println!("{}", serde_json::to_string_pretty(&doc)?);
            } else {
                print_status(&doc);
            }
        }
        Command::Watch => {
            let (watcher, mut docs) = StatusWatcher::spawn(status_path, &config.status);
            loop {
                tokio::select! {
                    doc = docs.recv() => match doc {
                        Some(doc) => print_status(&doc),
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            watcher.shutdown().await;
        }
        Command::Tree { pid } => {
            let tree = ProcessTree::new(Arc::new(SysinfoTable::new()));
            let descendants = tree.descendants(pid);
            if descendants.is_empty() {
                println!("{pid} has no descendants");
            }
            for node in descendants {
                println!(
                    "{:>7} {:>7} {}",
                    node.pid,
                    node.parent_pid.map_or_else(|| "-".to_owned(), |p| p.to_string()),
                    node.name
                );
            }
        }
        Command::Activity { pid, samples } => {
            let monitor = ActivityMonitor::new(Arc::new(SysinfoTable::new()), &config.activity);
            monitor.start_monitoring(pid);
            for _ in 0..samples {
                tokio::time::sleep(config.activity.poll_interval()).await;
                println!("{pid}: {:?}", monitor.activity_level(pid));
            }
            let tree_active = monitor.is_process_tree_active(pid).await;
            monitor.stop_monitoring(pid);
            println!("{pid} tree active: {tree_active}");
        }
        Command::Kill { pid } => {
            let protected: Vec<u32> = read_status_with_retry(
                &status_path,
                config.status.read_attempts,
                config.status.read_backoff(),
            )
            .await
            .ok()
            .flatten()
            .map(|doc| doc.servers.iter().filter_map(|s| s.pid).collect())
            .unwrap_or_default();
            kill_process(pid, &protected, KILL_GRACE).await?;
            println!("killed {pid}");
        }
    }

    Ok(())
}

fn print_status(doc: &StatusFile) {
    println!("updated {}", doc.updated_at.to_rfc3339());
    if doc.scanner_degraded {
        println!("scanner degraded: port list may be stale");
    }

    println!("{:<8} {:<9} {:>7} {:>6} {:>8}  URL", "SESSION", "STATUS", "PID", "PORT", "UPTIME");
    for server in &doc.servers {
        println!(
            "{:<8} {:<9} {:>7} {:>6} {:>8}  {}",
            server.session_id,
            format!("{:?}", server.status).to_lowercase(),
            opt(server.pid),
            opt(server.port),
            server.uptime.map_or_else(|| "-".to_owned(), |s| format!("{s}s")),
            server.url.as_deref().unwrap_or("-"),
        );
    }

    println!();
    println!("{:>6} {:>7} {:<10} {:<12} {:<8} MANAGED", "PORT", "PID", "ADDRESS", "USER", "COMMAND");
    for proc in &doc.system_processes {
        println!(
            "{:>6} {:>7} {:<10} {:<12} {:<8} {}",
            proc.port,
            proc.pid,
            proc.address,
            proc.user,
            proc.command,
            if proc.managed { "yes" } else { "" },
        );
    }
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_owned(), |v| v.to_string())
}
