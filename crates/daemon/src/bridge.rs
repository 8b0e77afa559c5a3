//! Per-connection bridge between a WebSocket client and a terminal session.
//!
//! One bridge runs per client connection: it acquires the session for the
//! requested key (evicting any stale one), announces readiness, then pumps
//! two concurrent loops until the process exits, the client disconnects, or
//! a stop frame arrives. The loops share only the session's running flag;
//! whichever notices termination first clears it and the other loop winds
//! down within one polling cycle.

use std::sync::Arc;
use std::time::Instant;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use protocol::{ClientFrame, ServerFrame};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::session::{DrainEvent, OutputBuffer, OutputDrain, Session, SessionRegistry};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsStream = SplitStream<WebSocketStream<TcpStream>>;

/// Drive one client connection for `key` until the session ends.
pub async fn handle_connection(
    socket: WebSocketStream<TcpStream>,
    key: String,
    registry: Arc<SessionRegistry>,
    config: SessionConfig,
) {
    let conn_id = Uuid::new_v4();
    let (mut sink, mut stream) = socket.split();

    tracing::info!(%conn_id, %key, "terminal connection opened");

    let session = match registry.acquire(&key).await {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(%conn_id, %key, error = %e, "session spawn failed");
            send_frame(
                &mut sink,
                &ServerFrame::Error {
                    message: e.to_string(),
                },
            )
            .await;
            let _ = sink.close().await;
            return;
        }
    };

    let Some(drain) = session.take_output() else {
        tracing::error!(%conn_id, %key, "session output already claimed");
        send_frame(
            &mut sink,
            &ServerFrame::Error {
                message: "session output already claimed".to_string(),
            },
        )
        .await;
        session.stop().await;
        registry.release(&session).await;
        let _ = sink.close().await;
        return;
    };

    let ready = ServerFrame::Ready {
        session_key: key.clone(),
    };
    if !send_frame(&mut sink, &ready).await {
        session.stop().await;
        registry.release(&session).await;
        return;
    }

    tokio::join!(
        output_loop(&mut sink, drain, &session, &config, conn_id),
        input_loop(&mut stream, &session, &config, conn_id),
    );

    // Teardown runs once here, regardless of which loop ended first
    session.stop().await;
    registry.release(&session).await;

    // Best-effort close; a failure here must not mask the session outcome
    let _ = sink.close().await;
    tracing::info!(%conn_id, %key, "terminal connection closed");
}

/// Pump PTY output to the client, applying the flush policy every cycle.
async fn output_loop(
    sink: &mut WsSink,
    mut drain: OutputDrain,
    session: &Arc<Session>,
    config: &SessionConfig,
    conn_id: Uuid,
) {
    let flush_interval = config.flush_interval();
    let mut buffer = OutputBuffer::new(flush_interval, config.flush_max_size, Instant::now());
    let mut exit_sent = false;

    while session.is_running() {
        // The wait doubles as the polling cadence: it returns on data or
        // after one flush interval, so both the flush policy and the
        // running flag are re-checked at least that often.
        match drain.next_chunk(flush_interval).await {
            DrainEvent::Data(chunk) => {
                buffer.push(&chunk);
                if let Some(more) = drain.drain_available() {
                    buffer.push(&more);
                }
            }
            DrainEvent::Idle => {}
            DrainEvent::Eof => {
                // Reader task finished; the liveness poll below reports it
            }
        }

        let now = Instant::now();
        if buffer.should_flush(now) {
            let bytes = buffer.take(now);
            if !send_output(sink, &bytes).await {
                tracing::debug!(%conn_id, "output send failed; ending output loop");
                session.clear_running();
                return;
            }
        }

        if !session.alive().await {
            // The reader task may still be catching up with the last PTY
            // buffer; collect until it goes idle or reports EOF
            loop {
                match drain.next_chunk(flush_interval).await {
                    DrainEvent::Data(chunk) => buffer.push(&chunk),
                    DrainEvent::Idle | DrainEvent::Eof => break,
                }
            }

            // Flush whatever was captured before the exit event so no
            // output is lost
            let bytes = buffer.take(Instant::now());
            if !bytes.is_empty() {
                let _ = send_output(sink, &bytes).await;
            }
            let code = session.exit_code().unwrap_or(0);
            let _ = send_frame(sink, &ServerFrame::Exit { code }).await;
            exit_sent = true;
            session.clear_running();
            break;
        }
    }

    if !exit_sent {
        // The running flag was cleared elsewhere (stop frame, disconnect,
        // or eviction): flush the tail and report the exit best-effort
        let bytes = buffer.take(Instant::now());
        if !bytes.is_empty() {
            let _ = send_output(sink, &bytes).await;
        }
        let code = session.exit_code().unwrap_or(0);
        let _ = send_frame(sink, &ServerFrame::Exit { code }).await;
    }
}

/// Dispatch client frames until the session stops or the client goes away.
async fn input_loop(
    stream: &mut WsStream,
    session: &Arc<Session>,
    config: &SessionConfig,
    conn_id: Uuid,
) {
    let poll = config.input_poll();

    while session.is_running() {
        let message = match tokio::time::timeout(poll, stream.next()).await {
            // Receive timeout: go around and re-check the running flag
            Err(_) => continue,
            // Client disconnected; a normal cancellation trigger
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                tracing::debug!(%conn_id, error = %e, "websocket receive failed");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => match ClientFrame::decode(&text) {
                Ok(ClientFrame::Input { data }) => session.write(data.as_bytes()).await,
                Ok(ClientFrame::Resize { rows, cols }) => session.resize(rows, cols).await,
                Ok(ClientFrame::Stop) => {
                    tracing::info!(%conn_id, "client requested stop");
                    // Only signal here; process teardown happens once in
                    // the handler's exit path
                    session.clear_running();
                    break;
                }
                Err(e) => {
                    tracing::warn!(%conn_id, error = %e, "ignoring malformed client frame");
                }
            },
            Message::Close(_) => break,
            // Ping/pong are handled by the protocol layer; binary frames
            // are not part of the protocol
            _ => {}
        }
    }

    session.clear_running();
}

async fn send_output(sink: &mut WsSink, bytes: &[u8]) -> bool {
    let data = String::from_utf8_lossy(bytes).into_owned();
    send_frame(sink, &ServerFrame::Output { data }).await
}

/// Send a frame, returning whether the transport is still usable.
async fn send_frame(sink: &mut WsSink, frame: &ServerFrame) -> bool {
    let json = match frame.encode() {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode server frame");
            return false;
        }
    };
    sink.send(Message::Text(json)).await.is_ok()
}
