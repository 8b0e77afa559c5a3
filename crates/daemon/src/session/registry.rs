//! Process-wide session registry.
//!
//! The registry is the single directory of live sessions, keyed by the
//! opaque session key. It is owned explicitly by the daemon and injected
//! into connection handlers; there is no global state.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::{Session, SessionError};
use crate::config::SessionConfig;

/// Introspection snapshot of one registered session.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    /// Session key.
    pub key: String,
    /// Process ID of the attached process.
    pub pid: Option<u32>,
    /// Whether the process was alive when the snapshot was taken.
    pub alive: bool,
}

/// Directory of live sessions, at most one per key.
///
/// All map mutations go through one mutex so that `acquire`'s
/// check-existing / stop-old / install-new sequence is a single critical
/// section: concurrent acquires for the same key cannot both install a
/// session, and a connecting client never shares a PTY with a stale one.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    config: SessionConfig,
}

impl SessionRegistry {
    /// Create an empty registry spawning sessions with `config`.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Get (or replace) the session for `key`.
    ///
    /// Any existing session for the key is stopped synchronously and
    /// discarded before the fresh one is spawned and installed.
    pub async fn acquire(&self, key: &str) -> Result<Arc<Session>, SessionError> {
        let mut sessions = self.sessions.lock().await;

        if let Some(stale) = sessions.remove(key) {
            tracing::info!(key, pid = ?stale.pid(), "evicting existing session for key");
            stale.stop().await;
        }

        let session = Session::spawn(key, &self.config)?;
        sessions.insert(key.to_string(), Arc::clone(&session));

        tracing::info!(key, pid = ?session.pid(), "registered session");
        Ok(session)
    }

    /// Remove `session` from the registry.
    ///
    /// The entry is only removed if it still maps to this exact session, so
    /// a connection that was evicted by a successor for the same key cannot
    /// tear down the successor's registration. Safe when the key is absent.
    pub async fn release(&self, session: &Arc<Session>) {
        let mut sessions = self.sessions.lock().await;
        if let Some(current) = sessions.get(session.key()) {
            if Arc::ptr_eq(current, session) {
                sessions.remove(session.key());
                tracing::debug!(key = session.key(), "released session");
            }
        }
    }

    /// Whether a session is registered for `key`.
    pub async fn contains(&self, key: &str) -> bool {
        self.sessions.lock().await.contains_key(key)
    }

    /// Number of registered sessions.
    pub async fn count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Snapshot of all registered sessions with refreshed liveness.
    ///
    /// Liveness polling may transition a session's internal state (the
    /// supervisor records exit on first observation); nothing else is
    /// mutated.
    pub async fn list(&self) -> Vec<SessionEntry> {
        let snapshot: Vec<(String, Arc<Session>)> = {
            let sessions = self.sessions.lock().await;
            sessions
                .iter()
                .map(|(k, s)| (k.clone(), Arc::clone(s)))
                .collect()
        };

        let mut entries = Vec::with_capacity(snapshot.len());
        for (key, session) in snapshot {
            let alive = session.alive().await;
            entries.push(SessionEntry {
                key,
                pid: session.pid(),
                alive,
            });
        }
        entries
    }

    /// Force-stop and remove the session for `key`.
    ///
    /// Returns whether a session was found.
    pub async fn kill(&self, key: &str) -> bool {
        let removed = self.sessions.lock().await.remove(key);
        match removed {
            Some(session) => {
                tracing::info!(key, pid = ?session.pid(), "force-stopping session");
                session.stop().await;
                true
            }
            None => false,
        }
    }

    /// Stop and remove every session. Used on daemon shutdown.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, Arc<Session>)> = {
            let mut sessions = self.sessions.lock().await;
            sessions.drain().collect()
        };

        for (key, session) in drained {
            tracing::info!(%key, "stopping session on shutdown");
            session.stop().await;
        }
    }
}
