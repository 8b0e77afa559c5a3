//! TermGate Daemon
//!
//! Terminal session gateway for browser clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;

use daemon::config::Config;
use daemon::ipc::{self, IpcClient, IpcRequest, IpcResponse, IpcServer};
use daemon::server;
use daemon::session::SessionRegistry;

/// TermGate daemon - terminal session gateway for browser clients.
#[derive(Parser, Debug)]
#[command(name = "termgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the daemon.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the TermGate daemon
    Start {
        /// Override the WebSocket listener address
        #[arg(long, value_name = "HOST:PORT")]
        bind: Option<String>,

        /// Write logs to daily-rotated files in this directory
        #[arg(long, value_name = "DIR")]
        log_dir: Option<PathBuf>,
    },

    /// Stop the running daemon
    Stop,

    /// Show daemon status
    Status,

    /// Manage active sessions
    #[command(subcommand)]
    Sessions(SessionsCommands),
}

/// Subcommands for session management.
#[derive(Subcommand, Debug, Clone)]
pub enum SessionsCommands {
    /// List all active sessions
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Force-stop an active session
    Kill {
        /// Session key to stop
        key: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };
    config.apply_env_overrides();

    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.daemon.log_level.clone()
    };
    let log_dir = match &cli.command {
        Commands::Start { log_dir, .. } => log_dir.clone(),
        _ => None,
    };
    let _log_guard = init_tracing(&level, log_dir.as_deref());

    let socket_path = config
        .server
        .ipc_socket
        .clone()
        .unwrap_or_else(ipc::default_socket_path);

    match cli.command {
        Commands::Start { bind, .. } => {
            if let Some(addr) = bind {
                config.server.bind_addr = addr;
            }
            config.validate()?;

            run_daemon(config, &socket_path).await?;
        }
        Commands::Stop => match send_request(&socket_path, IpcRequest::Stop).await {
            Ok(IpcResponse::Stopping) => {
                println!("Daemon stopping");
            }
            Ok(other) => {
                eprintln!("Unexpected response: {:?}", other);
                std::process::exit(1);
            }
            Err(_) => {
                eprintln!("Daemon is not running");
                std::process::exit(1);
            }
        },
        Commands::Status => match send_request(&socket_path, IpcRequest::Status).await {
            Ok(IpcResponse::Status {
                uptime_secs,
                session_count,
                ..
            }) => {
                println!("Daemon Status: running");
                println!("  Uptime:   {}", format_duration(uptime_secs));
                println!("  Sessions: {}", session_count);
            }
            Ok(other) => {
                eprintln!("Unexpected response: {:?}", other);
                std::process::exit(1);
            }
            Err(_) => {
                eprintln!("Daemon is not running");
                std::process::exit(1);
            }
        },
        Commands::Sessions(cmd) => match cmd {
            SessionsCommands::List { json } => {
                match send_request(&socket_path, IpcRequest::ListSessions).await {
                    Ok(IpcResponse::Sessions { sessions }) => {
                        if json {
                            println!("{}", serde_json::to_string_pretty(&sessions)?);
                        } else if sessions.is_empty() {
                            println!("No active sessions.");
                        } else {
                            println!("{:<24} {:>8}  {}", "KEY", "PID", "ALIVE");
                            for session in sessions {
                                let pid = session
                                    .pid
                                    .map(|p| p.to_string())
                                    .unwrap_or_else(|| "-".to_string());
                                println!("{:<24} {:>8}  {}", session.key, pid, session.alive);
                            }
                        }
                    }
                    Ok(other) => {
                        eprintln!("Unexpected response: {:?}", other);
                        std::process::exit(1);
                    }
                    Err(_) => {
                        eprintln!("Daemon is not running");
                        std::process::exit(1);
                    }
                }
            }
            SessionsCommands::Kill { key } => {
                match send_request(&socket_path, IpcRequest::KillSession { key: key.clone() })
                    .await
                {
                    Ok(IpcResponse::SessionKilled { key }) => {
                        println!("Session {} stopped", key);
                    }
                    Ok(IpcResponse::NotFound { key }) => {
                        eprintln!("No session for key {}", key);
                        std::process::exit(1);
                    }
                    Ok(other) => {
                        eprintln!("Unexpected response: {:?}", other);
                        std::process::exit(1);
                    }
                    Err(_) => {
                        eprintln!("Daemon is not running");
                        std::process::exit(1);
                    }
                }
            }
        },
    }

    Ok(())
}

/// Run the daemon in the foreground until shutdown.
async fn run_daemon(config: Config, socket_path: &Path) -> anyhow::Result<()> {
    // Refuse to double-start: a responding daemon already owns the socket
    if let Ok(mut client) = IpcClient::connect(socket_path).await {
        if client.ping().await {
            eprintln!("Error: daemon already running");
            eprintln!();
            eprintln!("To stop it, run:");
            eprintln!("  termgate-daemon stop");
            std::process::exit(1);
        }
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "TermGate daemon starting");

    let registry = Arc::new(SessionRegistry::new(config.session.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ipc_server = IpcServer::bind(socket_path)
        .await
        .with_context(|| format!("failed to bind IPC socket {}", socket_path.display()))?;
    let ipc_task = tokio::spawn(ipc::serve(
        ipc_server,
        Arc::clone(&registry),
        shutdown_tx.clone(),
        Instant::now(),
    ));

    let ctrl_c_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received; shutting down");
            let _ = ctrl_c_tx.send(true);
        }
    });

    server::run(config, registry, shutdown_rx).await?;

    ipc_task.abort();
    let _ = std::fs::remove_file(socket_path);
    tracing::info!("daemon stopped");
    Ok(())
}

/// Connect to the daemon and send a single admin request.
async fn send_request(
    socket_path: &Path,
    request: IpcRequest,
) -> Result<IpcResponse, ipc::IpcError> {
    let mut client = IpcClient::connect(socket_path).await?;
    client.send(request).await
}

/// Initialize tracing with an env-filter; `RUST_LOG` takes precedence over
/// the configured level. Returns the appender guard when file logging is on.
fn init_tracing(
    level: &str,
    log_dir: Option<&Path>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "termgate.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

/// Render seconds as a compact h/m/s string.
fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration_seconds() {
        assert_eq!(format_duration(42), "42s");
    }

    #[test]
    fn test_format_duration_minutes() {
        assert_eq!(format_duration(125), "2m 5s");
    }

    #[test]
    fn test_format_duration_hours() {
        assert_eq!(format_duration(3725), "1h 2m 5s");
    }
}
