//! WebSocket listener and connection routing.
//!
//! Terminal sessions are addressed by the request path: a client connects to
//! `ws://host:port/ws/session/{key}`. The key is extracted during the
//! handshake; any other path is rejected with an HTTP 404 before the upgrade
//! completes.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;

use crate::bridge;
use crate::config::{Config, SessionConfig};
use crate::session::SessionRegistry;

/// Path prefix of the terminal session endpoint.
const SESSION_PATH_PREFIX: &str = "/ws/session/";

/// Extract the session key from a `/ws/session/{key}` request path.
fn session_key_from_path(path: &str) -> Option<String> {
    let key = path.strip_prefix(SESSION_PATH_PREFIX)?;
    if key.is_empty() || key.contains('/') {
        return None;
    }
    Some(key.to_string())
}

/// Bind the configured address and serve until `shutdown` flips.
pub async fn run(
    config: Config,
    registry: Arc<SessionRegistry>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_addr))?;

    tracing::info!(addr = %config.server.bind_addr, "listening for terminal connections");
    run_with_listener(listener, config, registry, shutdown).await
}

/// Serve on an already-bound listener. Split out so tests can bind an
/// ephemeral port first.
pub async fn run_with_listener(
    listener: TcpListener,
    config: Config,
    registry: Arc<SessionRegistry>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                tracing::debug!(%peer, "incoming connection");

                let registry = Arc::clone(&registry);
                let session_config = config.session.clone();
                tokio::spawn(async move {
                    handle_incoming(stream, registry, session_config).await;
                });
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("shutdown requested; closing listener");
                    break;
                }
            }
        }
    }

    registry.shutdown().await;
    Ok(())
}

/// Complete the WebSocket handshake, routing by request path, then hand the
/// connection to the bridge.
async fn handle_incoming(
    stream: TcpStream,
    registry: Arc<SessionRegistry>,
    config: SessionConfig,
) {
    let mut key = None;
    let callback = |request: &Request, response: Response| {
        let path = request.uri().path();
        match session_key_from_path(path) {
            Some(k) => {
                key = Some(k);
                Ok(response)
            }
            None => {
                tracing::debug!(path, "rejecting request for unknown path");
                let mut reject = ErrorResponse::new(Some("not found".to_string()));
                *reject.status_mut() = StatusCode::NOT_FOUND;
                Err(reject)
            }
        }
    };

    let socket = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(socket) => socket,
        Err(e) => {
            tracing::debug!(error = %e, "websocket handshake failed");
            return;
        }
    };

    // The callback only accepts once it has stored a key
    let Some(key) = key else {
        return;
    };

    bridge::handle_connection(socket, key, registry, config).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_from_valid_path() {
        assert_eq!(
            session_key_from_path("/ws/session/task-1"),
            Some("task-1".to_string())
        );
    }

    #[test]
    fn test_session_key_allows_opaque_keys() {
        assert_eq!(
            session_key_from_path("/ws/session/a1b2-c3.d4_e5"),
            Some("a1b2-c3.d4_e5".to_string())
        );
    }

    #[test]
    fn test_session_key_rejects_empty_key() {
        assert_eq!(session_key_from_path("/ws/session/"), None);
    }

    #[test]
    fn test_session_key_rejects_nested_paths() {
        assert_eq!(session_key_from_path("/ws/session/a/b"), None);
    }

    #[test]
    fn test_session_key_rejects_other_paths() {
        assert_eq!(session_key_from_path("/"), None);
        assert_eq!(session_key_from_path("/api/sessions"), None);
        assert_eq!(session_key_from_path("/ws/session"), None);
    }
}
