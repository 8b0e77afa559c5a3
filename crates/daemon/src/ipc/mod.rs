//! Unix Domain Socket IPC module for CLI-daemon communication.
//!
//! The IPC system is the daemon's operational introspection surface: list
//! active sessions, force-stop a session by key, query status, and request
//! shutdown. It uses a JSON newline-delimited protocol for simplicity and
//! debugging convenience; each message is a single JSON object followed by
//! a newline.
//!
//! ## Socket Path
//!
//! The socket path follows the XDG Base Directory Specification:
//! - Primary: `$XDG_RUNTIME_DIR/termgate/daemon.sock`
//! - Fallback: `/tmp/termgate-$UID/daemon.sock`

mod client;
mod messages;
mod server;

pub use client::IpcClient;
pub use messages::{IpcRequest, IpcResponse, IpcSessionInfo};
pub use server::{serve, IpcConnection, IpcError, IpcServer};

use std::path::PathBuf;

/// Get the socket path for IPC communication.
///
/// 1. If `$XDG_RUNTIME_DIR` is set: `$XDG_RUNTIME_DIR/termgate/daemon.sock`
/// 2. Otherwise: `/tmp/termgate-$UID/daemon.sock`
#[cfg(unix)]
pub fn default_socket_path() -> PathBuf {
    use std::os::unix::fs::MetadataExt;

    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir)
            .join("termgate")
            .join("daemon.sock")
    } else {
        let uid = std::fs::metadata("/proc/self")
            .map(|m| m.uid())
            .unwrap_or(0);

        PathBuf::from(format!("/tmp/termgate-{}", uid)).join("daemon.sock")
    }
}

/// Non-Unix platforms are not supported for Unix Domain Sockets.
#[cfg(not(unix))]
pub fn default_socket_path() -> PathBuf {
    PathBuf::from("/tmp/termgate-unsupported/daemon.sock")
}
