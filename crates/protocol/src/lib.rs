//! # TermGate Protocol
//!
//! Wire protocol shared by the TermGate daemon and its clients.
//!
//! A terminal session is driven over a single bidirectional WebSocket
//! connection carrying JSON text frames, one object per message, tagged by a
//! `type` field:
//!
//! - Client to daemon: [`ClientFrame`] (`input`, `resize`, `stop`)
//! - Daemon to client: [`ServerFrame`] (`ready`, `output`, `exit`, `error`)
//!
//! The crate is I/O free; it only defines the frame shapes and their JSON
//! codec so the same definitions can back the daemon, tests, and any native
//! client.

pub mod error;
pub mod frames;

pub use error::{ProtocolError, Result};
pub use frames::{ClientFrame, ServerFrame};
