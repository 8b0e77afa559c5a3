//! PTY process supervision.
//!
//! A [`PtySupervisor`] owns exactly one child process attached to a
//! pseudo-terminal: it spawns the process, forwards input, applies window
//! resizes, drains output through a blocking reader task, and tears the
//! process down with a graceful-then-forceful escalation.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::config::SessionConfig;

/// Errors that can occur during session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// PTY allocation or process launch failed.
    #[error("failed to spawn session process: {0}")]
    Spawn(String),

    /// I/O error on the PTY.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capacity of the channel between the blocking reader task and the drain.
const READ_CHANNEL_CAPACITY: usize = 256;

/// Upper bound on bytes returned by a single [`OutputDrain::drain_available`].
const DRAIN_CEILING: usize = 16 * 1024;

/// Escalation policy for [`PtySupervisor::stop`].
#[derive(Debug, Clone, Copy)]
pub struct StopPolicy {
    /// Number of liveness polls after SIGTERM before escalating.
    pub grace_polls: u32,
    /// Interval between liveness polls.
    pub poll_interval: Duration,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            grace_polls: 20,
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// What to attach to a session's pseudo-terminal and how.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Program to run.
    pub command: String,
    /// Argument vector (already key-substituted).
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// TERM value exported to the child.
    pub term: String,
    /// Working directory.
    pub cwd: Option<PathBuf>,
    /// Initial terminal height in rows.
    pub rows: u16,
    /// Initial terminal width in columns.
    pub cols: u16,
    /// Size of individual PTY reads.
    pub read_chunk_size: usize,
    /// Stop escalation policy.
    pub stop: StopPolicy,
}

impl LaunchSpec {
    /// Build a launch spec for a session key from the daemon configuration.
    pub fn from_config(config: &SessionConfig, key: &str) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args_for_key(key),
            env: Vec::new(),
            term: config.term.clone(),
            cwd: config.cwd.clone(),
            rows: config.rows,
            cols: config.cols,
            read_chunk_size: config.read_chunk_size,
            stop: StopPolicy {
                grace_polls: config.stop_grace_polls,
                poll_interval: config.stop_poll_interval(),
            },
        }
    }
}

/// Event returned by [`OutputDrain::next_chunk`].
#[derive(Debug)]
pub enum DrainEvent {
    /// A chunk of output arrived.
    Data(Vec<u8>),
    /// The wait timed out with nothing pending.
    Idle,
    /// The reader task ended; no further output will arrive.
    Eof,
}

/// Receive side of the supervisor's output channel.
///
/// Handed out exactly once per session; the bridge's output loop is its sole
/// consumer, so no locking is needed around the buffered chunks.
pub struct OutputDrain {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl OutputDrain {
    fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { rx }
    }

    /// Wait up to `wait` for the next output chunk.
    ///
    /// This is the readiness wait bounding the output loop's cycle time: it
    /// returns as soon as data arrives, and no later than `wait`.
    pub async fn next_chunk(&mut self, wait: Duration) -> DrainEvent {
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Err(_) => DrainEvent::Idle,
            Ok(None) => DrainEvent::Eof,
            Ok(Some(chunk)) => DrainEvent::Data(chunk),
        }
    }

    /// Non-blocking drain of everything currently buffered, up to a 16 KiB
    /// ceiling per call. Returns `None` when nothing is pending.
    pub fn drain_available(&mut self) -> Option<Vec<u8>> {
        let mut out = Vec::new();
        while out.len() < DRAIN_CEILING {
            match self.rx.try_recv() {
                Ok(chunk) => out.extend_from_slice(&chunk),
                Err(_) => break,
            }
        }
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }
}

/// Supervisor for one pseudo-terminal-backed child process.
///
/// The process handle and the PTY handles are exclusively owned here and
/// touched only through these operations. They are either all present
/// (process running or not yet reaped) or all absent (after `stop`); no
/// partial state is observable from outside.
pub struct PtySupervisor {
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    child: Mutex<Option<Box<dyn Child + Send + Sync>>>,
    running: AtomicBool,
    exit_code: StdMutex<Option<i32>>,
    pid: Option<u32>,
    stop_policy: StopPolicy,
}

impl PtySupervisor {
    /// Allocate a PTY pair and spawn the process described by `spec`.
    ///
    /// On failure the allocated pair is dropped, which closes both ends, so
    /// a failed spawn leaks no resources.
    pub fn spawn(spec: &LaunchSpec) -> Result<(Self, OutputDrain), SessionError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: spec.rows,
                cols: spec.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::Spawn(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&spec.command);
        cmd.args(&spec.args);
        cmd.env("TERM", &spec.term);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &spec.cwd {
            cmd.cwd(dir);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::Spawn(e.to_string()))?;

        let pid = child.process_id();

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::Spawn(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::Spawn(e.to_string()))?;

        let (tx, rx) = mpsc::channel(READ_CHANNEL_CAPACITY);
        spawn_reader(reader, tx, spec.read_chunk_size);

        tracing::info!(pid = ?pid, command = %spec.command, "spawned session process");

        let supervisor = Self {
            master: Mutex::new(Some(pair.master)),
            writer: Mutex::new(Some(writer)),
            child: Mutex::new(Some(child)),
            running: AtomicBool::new(true),
            exit_code: StdMutex::new(None),
            pid,
            stop_policy: spec.stop,
        };

        Ok((supervisor, OutputDrain::new(rx)))
    }

    /// Process ID of the child, captured at spawn time.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the process is believed to be running.
    ///
    /// This reflects the last observation; it does not poll. Use
    /// [`is_alive`](Self::is_alive) to poll.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Exit code of the child, once observed.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code.lock().ok().and_then(|slot| *slot)
    }

    fn record_exit(&self, code: i32) {
        if let Ok(mut slot) = self.exit_code.lock() {
            if slot.is_none() {
                *slot = Some(code);
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }

    /// Forward bytes to the process's input stream.
    ///
    /// Writes are silently dropped once the session is no longer running;
    /// the protocol does not guarantee delivery after termination is
    /// requested. A failing write marks the session as stopped.
    pub async fn write(&self, data: &[u8]) {
        if !self.is_running() {
            tracing::trace!("dropping write to stopped session");
            return;
        }

        let mut writer = self.writer.lock().await;
        let Some(w) = writer.as_mut() else {
            return;
        };

        if let Err(e) = w.write_all(data).and_then(|_| w.flush()) {
            tracing::debug!(error = %e, "PTY write failed; marking session stopped");
            self.running.store(false, Ordering::SeqCst);
        }
    }

    /// Apply a window-size change to the pseudo-terminal.
    ///
    /// Safe to call at any time after spawn; a no-op once the process has
    /// exited and its handles were released.
    pub async fn resize(&self, rows: u16, cols: u16) {
        let master = self.master.lock().await;
        let Some(m) = master.as_ref() else {
            return;
        };

        if let Err(e) = m.resize(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        }) {
            tracing::debug!(error = %e, rows, cols, "PTY resize failed");
        }
    }

    /// Non-blocking poll of the child's status.
    ///
    /// The first observation of exit records the exit code and flips the
    /// running flag; subsequent calls keep returning `false`.
    pub async fn is_alive(&self) -> bool {
        if !self.is_running() {
            return false;
        }

        let mut child = self.child.lock().await;
        let Some(c) = child.as_mut() else {
            return false;
        };

        match c.try_wait() {
            Ok(Some(status)) => {
                let code = status.exit_code() as i32;
                tracing::info!(pid = ?self.pid, code, "session process exited");
                self.record_exit(code);
                false
            }
            Ok(None) => true,
            Err(e) => {
                tracing::debug!(error = %e, "child status poll failed; treating as exited");
                self.running.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    /// Stop the process: SIGTERM, a bounded grace window of liveness polls,
    /// then SIGKILL plus a wait for reclamation.
    ///
    /// Races with natural exit (not-found/already-reaped errors) are treated
    /// as success. Always releases the PTY handles and clears process state;
    /// idempotent and safe to call from a task other than the spawner.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);

        let mut child_slot = self.child.lock().await;
        if let Some(child) = child_slot.as_mut() {
            if let Some(pid) = child.process_id() {
                // ESRCH here just means the process beat us to the exit
                let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }

            let mut reaped = false;
            for _ in 0..self.stop_policy.grace_polls {
                tokio::time::sleep(self.stop_policy.poll_interval).await;
                match child.try_wait() {
                    Ok(Some(status)) => {
                        self.record_exit(status.exit_code() as i32);
                        reaped = true;
                        break;
                    }
                    Ok(None) => {}
                    Err(_) => {
                        reaped = true;
                        break;
                    }
                }
            }

            if !reaped {
                let _ = child.kill();
                let _ = child.wait();
            }

            tracing::info!(pid = ?self.pid, "session process stopped");
        }
        *child_slot = None;
        drop(child_slot);

        *self.writer.lock().await = None;
        // Closing the master unblocks the reader task, which then observes
        // EOF and drops its channel sender.
        *self.master.lock().await = None;
    }
}

/// Run the blocking PTY read loop on the blocking thread pool, forwarding
/// fixed-size chunks over the output channel.
fn spawn_reader(mut reader: Box<dyn Read + Send>, tx: mpsc::Sender<Vec<u8>>, chunk_size: usize) {
    tokio::task::spawn_blocking(move || {
        let mut buf = vec![0u8; chunk_size];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                // EIO is the normal way a closed PTY announces itself
                Err(_) => break,
            }
        }
        tracing::debug!("PTY reader task ended");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::time::Instant;

    fn spec_for(command: &str, args: &[&str]) -> LaunchSpec {
        LaunchSpec {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            env: Vec::new(),
            term: "xterm-256color".to_string(),
            cwd: None,
            rows: 24,
            cols: 80,
            read_chunk_size: 8 * 1024,
            stop: StopPolicy {
                grace_polls: 20,
                poll_interval: Duration::from_millis(50),
            },
        }
    }

    async fn collect_output(drain: &mut OutputDrain, needle: &str) -> bool {
        let mut accumulated = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            match drain.next_chunk(Duration::from_millis(100)).await {
                DrainEvent::Data(chunk) => {
                    accumulated.extend_from_slice(&chunk);
                    if let Some(more) = drain.drain_available() {
                        accumulated.extend_from_slice(&more);
                    }
                }
                DrainEvent::Idle => {}
                DrainEvent::Eof => break,
            }
            if String::from_utf8_lossy(&accumulated).contains(needle) {
                return true;
            }
        }
        false
    }

    #[tokio::test]
    #[serial]
    async fn test_spawn_and_echo_round_trip() {
        let (supervisor, mut drain) = PtySupervisor::spawn(&spec_for("/bin/cat", &[])).unwrap();
        assert!(supervisor.is_running());
        assert!(supervisor.pid().is_some());

        supervisor.write(b"hello supervisor\n").await;
        assert!(collect_output(&mut drain, "hello supervisor").await);

        supervisor.stop().await;
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    #[serial]
    async fn test_spawn_failure_returns_typed_error() {
        let result = PtySupervisor::spawn(&spec_for("/nonexistent/binary/xyz", &[]));
        assert!(matches!(result, Err(SessionError::Spawn(_))));
    }

    #[tokio::test]
    #[serial]
    async fn test_is_alive_records_exit_code() {
        let (supervisor, _drain) =
            PtySupervisor::spawn(&spec_for("/bin/sh", &["-c", "exit 7"])).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while supervisor.is_alive().await {
            assert!(Instant::now() < deadline, "process did not exit in time");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(supervisor.exit_code(), Some(7));
        // Idempotent after the first observation
        assert!(!supervisor.is_alive().await);
        supervisor.stop().await;
    }

    #[tokio::test]
    #[serial]
    async fn test_stop_is_idempotent() {
        let (supervisor, _drain) = PtySupervisor::spawn(&spec_for("/bin/cat", &[])).unwrap();

        supervisor.stop().await;
        supervisor.stop().await;
        assert!(!supervisor.is_running());
        assert!(!supervisor.is_alive().await);
    }

    #[tokio::test]
    #[serial]
    async fn test_concurrent_stop_from_two_tasks() {
        let supervisor =
            std::sync::Arc::new(PtySupervisor::spawn(&spec_for("/bin/cat", &[])).unwrap().0);

        let a = {
            let s = std::sync::Arc::clone(&supervisor);
            tokio::spawn(async move { s.stop().await })
        };
        let b = {
            let s = std::sync::Arc::clone(&supervisor);
            tokio::spawn(async move { s.stop().await })
        };

        a.await.unwrap();
        b.await.unwrap();
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    #[serial]
    async fn test_write_after_stop_is_dropped() {
        let (supervisor, _drain) = PtySupervisor::spawn(&spec_for("/bin/cat", &[])).unwrap();
        supervisor.stop().await;

        // Must not panic or error
        supervisor.write(b"ignored\n").await;
    }

    #[tokio::test]
    #[serial]
    async fn test_resize_after_stop_is_noop() {
        let (supervisor, _drain) = PtySupervisor::spawn(&spec_for("/bin/cat", &[])).unwrap();
        supervisor.resize(40, 120).await;
        supervisor.stop().await;
        supervisor.resize(50, 200).await;
    }

    #[tokio::test]
    #[serial]
    async fn test_resize_is_visible_to_size_aware_program() {
        let (supervisor, mut drain) =
            PtySupervisor::spawn(&spec_for("/bin/sh", &["-i"])).unwrap();

        supervisor.resize(40, 120).await;
        // stty reads the size from the PTY itself
        supervisor.write(b"stty size\n").await;
        assert!(collect_output(&mut drain, "40 120").await);

        supervisor.stop().await;
    }

    #[tokio::test]
    #[serial]
    async fn test_drain_available_empty_returns_none() {
        let (supervisor, mut drain) = PtySupervisor::spawn(&spec_for("/bin/cat", &[])).unwrap();

        // Nothing written yet; first drain right after spawn is empty
        assert!(drain.drain_available().is_none());
        supervisor.stop().await;
    }

    #[test]
    fn test_launch_spec_from_config_substitutes_key() {
        let mut config = SessionConfig::default();
        config.command = "/usr/bin/tracker".to_string();
        config.args = vec!["attach".to_string(), "{key}".to_string()];

        let spec = LaunchSpec::from_config(&config, "task-9");
        assert_eq!(spec.command, "/usr/bin/tracker");
        assert_eq!(spec.args, vec!["attach", "task-9"]);
        assert_eq!(spec.stop.grace_polls, 20);
    }
}
