//! IPC server for handling CLI connections via Unix Domain Sockets.
//!
//! The server listens on a Unix socket and accepts connections from CLI
//! clients, answering admin requests against the session registry.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;

use super::messages::{IpcRequest, IpcResponse, IpcSessionInfo};
use crate::session::SessionRegistry;

/// Errors that can occur during IPC communication.
#[derive(Debug, thiserror::Error)]
pub enum IpcError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A JSON serialization/deserialization error occurred.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A server that listens for IPC connections on a Unix Domain Socket.
pub struct IpcServer {
    listener: UnixListener,
}

impl IpcServer {
    /// Bind the server to the specified socket path.
    ///
    /// Creates parent directories as needed and removes any stale socket
    /// file left behind by a previous run.
    pub async fn bind(path: &Path) -> Result<Self, io::Error> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        if path.exists() {
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;
        Ok(Self { listener })
    }

    /// Accept a new incoming connection.
    pub async fn accept(&self) -> Result<IpcConnection, io::Error> {
        let (stream, _addr) = self.listener.accept().await?;
        Ok(IpcConnection::new(stream))
    }
}

/// A connection to an IPC client, speaking newline-delimited JSON.
pub struct IpcConnection {
    reader: BufReader<tokio::io::ReadHalf<UnixStream>>,
    writer: tokio::io::WriteHalf<UnixStream>,
}

impl IpcConnection {
    fn new(stream: UnixStream) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    /// Read the next request from the client.
    ///
    /// Returns `None` if the client has disconnected.
    pub async fn read_request(&mut self) -> Result<Option<IpcRequest>, IpcError> {
        let mut line = String::new();
        let bytes_read = self.reader.read_line(&mut line).await?;

        if bytes_read == 0 {
            return Ok(None);
        }

        let request = serde_json::from_str(line.trim())?;
        Ok(Some(request))
    }

    /// Send a response to the client.
    pub async fn send_response(&mut self, response: &IpcResponse) -> Result<(), IpcError> {
        let mut json = serde_json::to_string(response)?;
        json.push('\n');

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Serve admin requests until the daemon shuts down.
///
/// Each accepted connection is handled on its own task; a `Stop` request
/// flips the shared shutdown flag after acknowledging the client.
pub async fn serve(
    server: IpcServer,
    registry: Arc<SessionRegistry>,
    shutdown: watch::Sender<bool>,
    started_at: Instant,
) {
    loop {
        let mut conn = match server.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "IPC accept failed");
                continue;
            }
        };

        let registry = Arc::clone(&registry);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            while let Ok(Some(request)) = conn.read_request().await {
                let response = answer(&request, &registry, &shutdown, started_at).await;
                if conn.send_response(&response).await.is_err() {
                    break;
                }
                if matches!(request, IpcRequest::Stop) {
                    break;
                }
            }
        });
    }
}

async fn answer(
    request: &IpcRequest,
    registry: &SessionRegistry,
    shutdown: &watch::Sender<bool>,
    started_at: Instant,
) -> IpcResponse {
    match request {
        IpcRequest::Ping => IpcResponse::Pong,
        IpcRequest::Status => IpcResponse::Status {
            running: true,
            uptime_secs: started_at.elapsed().as_secs(),
            session_count: registry.count().await,
        },
        IpcRequest::ListSessions => {
            let sessions = registry
                .list()
                .await
                .into_iter()
                .map(IpcSessionInfo::from)
                .collect();
            IpcResponse::Sessions { sessions }
        }
        IpcRequest::KillSession { key } => {
            if registry.kill(key).await {
                IpcResponse::SessionKilled { key: key.clone() }
            } else {
                IpcResponse::NotFound { key: key.clone() }
            }
        }
        IpcRequest::Stop => {
            tracing::info!("stop requested over IPC");
            let _ = shutdown.send(true);
            IpcResponse::Stopping
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use serial_test::serial;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_server_bind_creates_parent_dirs() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("nested").join("dir").join("test.sock");

        let server = IpcServer::bind(&socket_path).await.unwrap();
        assert!(socket_path.exists());
        drop(server);
    }

    #[tokio::test]
    async fn test_server_bind_removes_existing_socket() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let server1 = IpcServer::bind(&socket_path).await.unwrap();
        drop(server1);

        let _server2 = IpcServer::bind(&socket_path).await.unwrap();
        assert!(socket_path.exists());
    }

    #[tokio::test]
    async fn test_connection_read_returns_none_on_disconnect() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("test.sock");

        let server = IpcServer::bind(&socket_path).await.unwrap();

        let socket_path_clone = socket_path.clone();
        tokio::spawn(async move {
            let _stream = UnixStream::connect(&socket_path_clone).await.unwrap();
            // Stream drops immediately
        });

        let mut conn = server.accept().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let request = conn.read_request().await.unwrap();
        assert!(request.is_none());
    }

    #[tokio::test]
    #[serial]
    async fn test_serve_answers_requests_against_registry() {
        let temp_dir = tempdir().unwrap();
        let socket_path = temp_dir.path().join("admin.sock");

        let config = SessionConfig {
            command: "/bin/cat".to_string(),
            args: Vec::new(),
            ..SessionConfig::default()
        };
        let registry = Arc::new(SessionRegistry::new(config));
        let _session = registry.acquire("task-1").await.unwrap();

        let server = IpcServer::bind(&socket_path).await.unwrap();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let serve_registry = Arc::clone(&registry);
        let serve_task = tokio::spawn(serve(
            server,
            serve_registry,
            shutdown_tx,
            Instant::now(),
        ));

        let mut client = super::super::IpcClient::connect(&socket_path).await.unwrap();

        let response = client.send(IpcRequest::Ping).await.unwrap();
        assert_eq!(response, IpcResponse::Pong);

        let response = client.send(IpcRequest::Status).await.unwrap();
        assert!(matches!(
            response,
            IpcResponse::Status {
                running: true,
                session_count: 1,
                ..
            }
        ));

        let response = client.send(IpcRequest::ListSessions).await.unwrap();
        match response {
            IpcResponse::Sessions { sessions } => {
                assert_eq!(sessions.len(), 1);
                assert_eq!(sessions[0].key, "task-1");
                assert!(sessions[0].alive);
            }
            other => panic!("unexpected response: {:?}", other),
        }

        let response = client
            .send(IpcRequest::KillSession {
                key: "task-1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(
            response,
            IpcResponse::SessionKilled {
                key: "task-1".to_string()
            }
        );
        assert!(!registry.contains("task-1").await);

        let response = client
            .send(IpcRequest::KillSession {
                key: "task-1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(
            response,
            IpcResponse::NotFound {
                key: "task-1".to_string()
            }
        );

        let response = client.send(IpcRequest::Stop).await.unwrap();
        assert_eq!(response, IpcResponse::Stopping);
        shutdown_rx.changed().await.unwrap();
        assert!(*shutdown_rx.borrow());

        serve_task.abort();
    }
}
