//! Terminal session management.
//!
//! A [`Session`] binds an opaque session key to one supervised PTY process;
//! the [`SessionRegistry`](registry::SessionRegistry) enforces at most one
//! live session per key.

pub mod flush;
pub mod registry;
pub mod supervisor;

pub use flush::OutputBuffer;
pub use registry::{SessionEntry, SessionRegistry};
pub use supervisor::{DrainEvent, LaunchSpec, OutputDrain, PtySupervisor, SessionError, StopPolicy};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use crate::config::SessionConfig;

/// One live terminal session: a key, its supervised process, and the shared
/// running flag coordinating the connection's two streaming loops.
///
/// The flag is the sole synchronization primitive between the loops: whoever
/// notices termination first (process exit, client stop, disconnect, or
/// eviction) clears it, and the other loop observes that within one polling
/// cycle.
pub struct Session {
    key: String,
    supervisor: PtySupervisor,
    running: AtomicBool,
    drain: StdMutex<Option<OutputDrain>>,
}

impl Session {
    /// Spawn the process for `key` and wrap it in a session.
    pub fn spawn(key: &str, config: &SessionConfig) -> Result<Arc<Self>, SessionError> {
        let spec = LaunchSpec::from_config(config, key);
        let (supervisor, drain) = PtySupervisor::spawn(&spec)?;

        Ok(Arc::new(Self {
            key: key.to_string(),
            supervisor,
            running: AtomicBool::new(true),
            drain: StdMutex::new(Some(drain)),
        }))
    }

    /// The session key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Process ID of the attached process.
    pub fn pid(&self) -> Option<u32> {
        self.supervisor.pid()
    }

    /// Shared running flag observed by both streaming loops.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Clear the running flag, asking both loops to wind down.
    pub fn clear_running(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Hand out the output drain. Yields `Some` exactly once; the bridge's
    /// output loop is the only consumer of session output.
    pub fn take_output(&self) -> Option<OutputDrain> {
        self.drain.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Forward client input to the process; dropped when not running.
    pub async fn write(&self, data: &[u8]) {
        if !self.is_running() {
            return;
        }
        self.supervisor.write(data).await;
    }

    /// Apply a window-size change.
    pub async fn resize(&self, rows: u16, cols: u16) {
        self.supervisor.resize(rows, cols).await;
    }

    /// Poll whether the process is still alive (records the exit code on the
    /// first observation of exit).
    pub async fn alive(&self) -> bool {
        self.supervisor.is_alive().await
    }

    /// Exit code of the process, once observed.
    pub fn exit_code(&self) -> Option<i32> {
        self.supervisor.exit_code()
    }

    /// Stop the session: clear the running flag and tear the process down.
    /// Idempotent; callable from any task.
    pub async fn stop(&self) {
        self.clear_running();
        self.supervisor.stop().await;
    }
}
