//! IPC message types for CLI-daemon communication.
//!
//! This module defines the request and response types used for communication
//! between the CLI and the daemon over Unix Domain Sockets.

use serde::{Deserialize, Serialize};

use crate::session::SessionEntry;

/// Requests that can be sent from the CLI to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcRequest {
    /// Check if the daemon is alive.
    Ping,
    /// Get the current status of the daemon.
    Status,
    /// Request the daemon to stop gracefully.
    Stop,
    /// List all active terminal sessions.
    ListSessions,
    /// Force-stop a session by its key.
    KillSession {
        /// Key of the session to stop.
        key: String,
    },
}

/// Responses sent from the daemon to the CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum IpcResponse {
    /// Response to a Ping request.
    Pong,
    /// Current daemon status.
    Status {
        /// Whether the daemon is running.
        running: bool,
        /// Uptime in seconds.
        uptime_secs: u64,
        /// Number of active sessions.
        session_count: usize,
    },
    /// Acknowledgment that the daemon is stopping.
    Stopping,
    /// List of active sessions.
    Sessions {
        /// Information about each active session.
        sessions: Vec<IpcSessionInfo>,
    },
    /// Confirmation that a session was stopped.
    SessionKilled {
        /// Key of the stopped session.
        key: String,
    },
    /// No session is registered for the key.
    NotFound {
        /// The key that was requested.
        key: String,
    },
    /// An error occurred processing the request.
    Error {
        /// Human-readable error message.
        message: String,
    },
}

/// Information about an active session for IPC communication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IpcSessionInfo {
    /// Session key.
    pub key: String,
    /// Process ID of the attached process.
    pub pid: Option<u32>,
    /// Whether the process was alive at snapshot time.
    pub alive: bool,
}

impl From<SessionEntry> for IpcSessionInfo {
    fn from(entry: SessionEntry) -> Self {
        Self {
            key: entry.key,
            pid: entry.pid,
            alive: entry.alive,
        }
    }
}
