//! Wire frame definitions for the terminal session bridge.
//!
//! Each WebSocket text message carries exactly one JSON object tagged with a
//! `type` field. The frame shapes are a compatibility surface for the browser
//! client and must not change without a client update.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};

/// Frames sent from the client to the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Raw keystrokes destined for the process's stdin.
    Input {
        /// UTF-8 text to append to the process input stream.
        data: String,
    },
    /// Terminal window size change.
    Resize {
        /// New terminal height in rows.
        rows: u16,
        /// New terminal width in columns.
        cols: u16,
    },
    /// Request graceful termination of the session.
    Stop,
}

/// Frames sent from the daemon to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// The process has been spawned and streaming begins.
    Ready {
        /// Key of the session the client is now attached to.
        session_key: String,
    },
    /// A chunk of terminal output.
    ///
    /// Bytes are decoded lossily before transport, so `data` may contain
    /// replacement characters but never breaks the stream.
    Output {
        /// Decoded terminal output.
        data: String,
    },
    /// The process has terminated; the connection will close.
    Exit {
        /// Process exit code.
        code: i32,
    },
    /// A fatal condition occurred; the connection will close.
    Error {
        /// Human-readable description of the failure.
        message: String,
    },
}

impl ClientFrame {
    /// Parse a client frame from a JSON text message.
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(ProtocolError::from)
    }

    /// Serialize the frame to its JSON wire form.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(ProtocolError::from)
    }
}

impl ServerFrame {
    /// Parse a server frame from a JSON text message.
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(ProtocolError::from)
    }

    /// Serialize the frame to its JSON wire form.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(ProtocolError::from)
    }
}
