//! # TermGate Daemon Library
//!
//! This crate provides the TermGate daemon: a gateway that exposes remote,
//! interactive terminal sessions to browser clients over WebSocket.
//!
//! ## Overview
//!
//! Each session attaches one long-running interactive process to a
//! pseudo-terminal and streams it over a single bidirectional connection:
//!
//! - **PTY Supervision**: spawn, resize, feed, drain, and tear down one
//!   PTY-backed process per session
//! - **Output Flushing**: coalesce terminal output into time- and
//!   size-bounded batches
//! - **Session Registry**: at most one live session per key, with
//!   evict-then-install semantics on reconnect
//! - **Bridge Handler**: per-connection state machine pumping input and
//!   output concurrently
//! - **IPC Admin Surface**: list and force-stop sessions from the CLI
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                     TermGate Daemon                       │
//! ├───────────────────────────────────────────────────────────┤
//! │                                                           │
//! │  ┌──────────────┐   ┌───────────────┐   ┌─────────────┐  │
//! │  │   Session    │   │    Output     │   │     IPC     │  │
//! │  │   Registry   │   │  Flush Policy │   │   Server    │  │
//! │  └──────┬───────┘   └───────┬───────┘   └─────────────┘  │
//! │         │                   │                             │
//! │  ┌──────┴───────────────────┴──────────────────────────┐ │
//! │  │            Bridge Handler (per connection)          │ │
//! │  └──────────────────────────┬──────────────────────────┘ │
//! │                             │                             │
//! │  ┌──────────────────────────┴──────────────────────────┐ │
//! │  │                 WebSocket Listener                  │ │
//! │  └─────────────────────────────────────────────────────┘ │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`session`]: PTY supervision, flush policy, and the session registry
//! - [`bridge`]: Per-connection protocol handling
//! - [`server`]: WebSocket listener and routing
//! - [`ipc`]: Unix-socket admin surface

pub mod bridge;
pub mod config;
pub mod ipc;
pub mod server;
pub mod session;

// Re-export protocol for convenience
pub use protocol;

// Re-export config types for convenience
pub use config::{Config, ConfigError};

// Re-export session types for convenience
pub use session::{
    OutputBuffer, PtySupervisor, Session, SessionEntry, SessionError, SessionRegistry,
};

// Re-export IPC types for convenience
pub use ipc::{IpcClient, IpcRequest, IpcResponse, IpcServer, IpcSessionInfo};
