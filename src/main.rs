#![forbid(unsafe_code)]

//! `session-warden` — dev-server and port observability service.
//!
//! Builds the port pool, log buffers, listening-socket scanner, and
//! dev-server manager, then keeps the status file current until shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use session_warden::config::GlobalConfig;
use session_warden::log_manager::LogManager;
use session_warden::models::server::LaunchSpec;
use session_warden::models::SessionId;
use session_warden::orchestrator::dev_server::{DevServerManager, ServerEvent};
use session_warden::ports::manager::PortManager;
use session_warden::ports::scanner::{LsofSource, PortScanner, PresentationFilter};
use session_warden::status::file::StatusWriter;
use session_warden::status::paths::default_status_path;
use session_warden::status::publisher::StatusPublisher;
use session_warden::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "session-warden", about = "Dev-server and port observability service", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Built-in defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the status file location.
    #[arg(long)]
    status_file: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scan ports and publish status until interrupted (default).
    Serve,

    /// Supervise one dev server and publish status until it exits.
    Run {
        /// Session the server belongs to.
        #[arg(long, default_value_t = 1)]
        session: SessionId,

        /// Working directory; defaults to the current directory.
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Port to try before scanning the configured range.
        #[arg(long)]
        port: Option<u16>,

        /// Command line run through the login shell.
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("session-warden bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    let status_path = args.status_file.clone().unwrap_or_else(default_status_path);
    info!(status_file = %status_path.display(), "configuration loaded");

    // ── Build components ────────────────────────────────
    let scanner = Arc::new(PortScanner::new(
        Arc::new(LsofSource::from_config(&config.scanner)),
        PresentationFilter::from_config(&config.ports, &config.scanner),
        config.scanner.interval(),
    ));
    let ports = Arc::new(PortManager::new(config.ports.range()));
    let logs = Arc::new(LogManager::new(config.logs.capacity));
    let servers = DevServerManager::new(
        config.dev_server.clone(),
        ports,
        logs,
        Arc::clone(&scanner),
    );
    let publisher = Arc::new(StatusPublisher::new(
        StatusWriter::new(status_path),
        servers.clone(),
        Arc::clone(&scanner),
        config.status.heartbeat(),
    ));

    // ── Start background tasks ──────────────────────────
    let ct = CancellationToken::new();
    // The publisher installs the scanner callback, so it starts first.
    let publisher_handle = publisher.spawn(ct.clone());
    let scanner_handle = Arc::clone(&scanner).spawn(ct.clone());

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            info!("session-warden ready");
            shutdown_signal().await;
            info!("shutdown signal received");
        }
        Command::Run {
            session,
            cwd,
            port,
            command,
        } => {
            let working_directory = match cwd {
                Some(dir) => dir,
                None => std::env::current_dir()
                    .map_err(|err| AppError::Io(format!("cannot resolve current dir: {err}")))?,
            };
            let mut events = servers.subscribe();
            let entry = servers
                .start_process(
                    session,
                    LaunchSpec {
                        command: command.join(" "),
                        working_directory,
                        preferred_port: port,
                        env: std::collections::HashMap::new(),
                    },
                )
                .await?;
            info!(session, port = ?entry.port, pid = ?entry.pid, "dev server started");

            tokio::select! {
                () = shutdown_signal() => info!("shutdown signal received"),
                () = wait_for_exit(&mut events, session) => info!(session, "dev server exited"),
            }
        }
    }

    // ── Graceful shutdown ───────────────────────────────
    servers.stop_all().await;
    ct.cancel();
    let _ = tokio::join!(publisher_handle, scanner_handle);
    info!("session-warden shut down");

    Ok(())
}

/// Log lifecycle events of `session` until its server exits.
async fn wait_for_exit(events: &mut tokio::sync::broadcast::Receiver<ServerEvent>, session: SessionId) {
    loop {
        match events.recv().await {
            Ok(ServerEvent::UrlDetected { session_id, url }) if session_id == session => {
                info!(session, url = %url, "dev server ready");
            }
            Ok(ServerEvent::Exited {
                session_id,
                exit_code,
            }) if session_id == session => {
                if exit_code != Some(0) {
                    error!(session, ?exit_code, "dev server failed");
                }
                return;
            }
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => return,
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
