//! Persistent event channel with automatic reconnect
//!
//! Each logical stream (video events, log events) gets one task that owns the
//! websocket, decodes messages in arrival order, and forwards them to a shared
//! sink tagged with the channel they came from. A dropped connection is never
//! fatal: the task backs off and dials again until the handle is closed.

use futures::StreamExt;
use serde::Serialize;
use std::fmt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::Backoff;
use crate::data::{decode_message, DetectionEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Video,
    Logs,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Video => f.write_str("video"),
            ChannelKind::Logs => f.write_str("logs"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// What a channel task reports to the sink
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A new session started. History from earlier sessions is not replayed.
    Opened { session_id: Uuid },
    Message(DetectionEvent),
    /// Connection failed or dropped; a reconnect is already scheduled
    Closed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMessage {
    pub channel: ChannelKind,
    pub event: ChannelEvent,
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum ReadOutcome {
    Closed(String),
    Cancelled,
    SinkGone,
}

/// Owner of one channel task. Dropping the handle stops the task.
#[derive(Debug)]
pub struct ChannelHandle {
    kind: ChannelKind,
    state_rx: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ChannelHandle {
    /// Spawn the channel task; it starts dialing immediately
    pub fn open(
        kind: ChannelKind,
        url: impl Into<String>,
        backoff: Backoff,
        sink: mpsc::UnboundedSender<ChannelMessage>,
    ) -> Self {
        let url = url.into();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_channel(kind, url, backoff, sink, state_tx, cancel.clone()));

        Self {
            kind,
            state_rx,
            cancel,
            task: Some(task),
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Stop reconnecting, close the socket and wait for the task to finish
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("{} channel task ended abnormally: {}", self.kind, e);
            }
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_channel(
    kind: ChannelKind,
    url: String,
    backoff: Backoff,
    sink: mpsc::UnboundedSender<ChannelMessage>,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        state_tx.send_replace(ConnectionState::Connecting);
        debug!("Connecting {} channel to {}", kind, url);

        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = connect_async(url.as_str()) => result,
        };

        let reason = match connected {
            Ok((socket, _response)) => {
                attempt = 0;
                let session_id = Uuid::new_v4();
                state_tx.send_replace(ConnectionState::Open);
                info!("{} channel open (session {})", kind, session_id);

                let opened = ChannelMessage {
                    channel: kind,
                    event: ChannelEvent::Opened { session_id },
                };
                if sink.send(opened).is_err() {
                    break;
                }

                match read_until_closed(kind, socket, &sink, &cancel).await {
                    ReadOutcome::Closed(reason) => reason,
                    ReadOutcome::Cancelled | ReadOutcome::SinkGone => break,
                }
            }
            Err(e) => e.to_string(),
        };

        state_tx.send_replace(ConnectionState::Closed);
        let closed = ChannelMessage {
            channel: kind,
            event: ChannelEvent::Closed {
                reason: reason.clone(),
            },
        };
        if sink.send(closed).is_err() {
            break;
        }

        attempt = attempt.saturating_add(1);
        let delay = backoff.delay(&url, attempt);
        warn!(
            "{} channel closed ({}), reconnecting in {:?} (attempt {})",
            kind, reason, delay, attempt
        );

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    state_tx.send_replace(ConnectionState::Closed);
    info!("{} channel stopped", kind);
}

async fn read_until_closed(
    kind: ChannelKind,
    mut socket: Socket,
    sink: &mpsc::UnboundedSender<ChannelMessage>,
    cancel: &CancellationToken,
) -> ReadOutcome {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = socket.close(None).await {
                    debug!("{} channel close handshake failed: {}", kind, e);
                }
                return ReadOutcome::Cancelled;
            }
            next = socket.next() => next,
        };

        let payload = match next {
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Binary(bytes))) => bytes,
            Some(Ok(Message::Close(frame))) => {
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "closed by server".to_string());
                return ReadOutcome::Closed(reason);
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return ReadOutcome::Closed(e.to_string()),
            None => return ReadOutcome::Closed("stream ended".to_string()),
        };

        match decode_message(&payload) {
            Ok(event) => {
                let message = ChannelMessage {
                    channel: kind,
                    event: ChannelEvent::Message(event),
                };
                if sink.send(message).is_err() {
                    return ReadOutcome::SinkGone;
                }
            }
            Err(e) => {
                warn!("Dropping malformed {} message: {}", kind, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
    use axum::response::Response;
    use axum::routing::get;
    use axum::Router;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn scripted_session(mut socket: WebSocket) {
        let script = [
            WsMessage::Text(r#"{"type":"event","event_type":"processing_started","data":{}}"#.to_string()),
            WsMessage::Binary(
                br#"{"type":"event","event_type":"container_capture","data":{"entity_id":4}}"#.to_vec(),
            ),
            WsMessage::Text(r#"{"type":"event","event_type":"container_capture""#.to_string()),
            WsMessage::Text(
                r#"{"type":"event","event_type":"error","data":{"message":"camera offline"}}"#.to_string(),
            ),
        ];
        for message in script {
            if socket.send(message).await.is_err() {
                return;
            }
        }
        let _ = socket.send(WsMessage::Close(None)).await;
    }

    async fn handler(ws: WebSocketUpgrade) -> Response {
        ws.on_upgrade(scripted_session)
    }

    async fn spawn_server() -> String {
        let app = Router::new().route("/ws", get(handler));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("ws://{}/ws", addr)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ChannelMessage>) -> ChannelEvent {
        let message = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("channel event timed out")
            .expect("sink closed");
        assert_eq!(message.channel, ChannelKind::Video);
        message.event
    }

    #[tokio::test]
    async fn test_delivers_in_order_and_reconnects() {
        let url = spawn_server().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(50));
        let handle = ChannelHandle::open(ChannelKind::Video, url, backoff, tx);

        let ChannelEvent::Opened { session_id: first } = next_event(&mut rx).await else {
            panic!("expected open");
        };
        assert_eq!(
            next_event(&mut rx).await,
            ChannelEvent::Message(DetectionEvent::ProcessingStarted)
        );
        // binary frames carry the same JSON envelope
        assert_eq!(
            next_event(&mut rx).await,
            ChannelEvent::Message(DetectionEvent::ContainerCapture {
                entity_id: "4".to_string()
            })
        );
        // the truncated message is dropped without closing the channel
        assert_eq!(
            next_event(&mut rx).await,
            ChannelEvent::Message(DetectionEvent::Error {
                message: "camera offline".to_string()
            })
        );
        assert!(matches!(next_event(&mut rx).await, ChannelEvent::Closed { .. }));

        let ChannelEvent::Opened { session_id: second } = next_event(&mut rx).await else {
            panic!("expected reconnect");
        };
        assert_ne!(first, second, "every reconnect is a fresh session");

        handle.close().await;
    }

    #[tokio::test]
    async fn test_attempts_reset_after_successful_open() {
        let url = spawn_server().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        // without a reset the ninth reconnect alone would wait over five seconds
        let backoff = Backoff::new(Duration::from_millis(20), Duration::from_secs(60));
        let handle = ChannelHandle::open(ChannelKind::Video, url, backoff, tx);

        let sessions = timeout(Duration::from_secs(3), async {
            let mut opened = 0;
            while let Some(message) = rx.recv().await {
                if matches!(message.event, ChannelEvent::Opened { .. }) {
                    opened += 1;
                    if opened == 10 {
                        break;
                    }
                }
            }
            opened
        })
        .await
        .expect("reconnect delay kept growing across successful sessions");
        assert_eq!(sessions, 10);

        handle.close().await;
    }

    #[tokio::test]
    async fn test_close_interrupts_backoff() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let backoff = Backoff::new(Duration::from_secs(60), Duration::from_secs(60));
        let handle = ChannelHandle::open(ChannelKind::Video, "ws://127.0.0.1:1/ws", backoff, tx);

        assert!(matches!(next_event(&mut rx).await, ChannelEvent::Closed { .. }));
        assert_eq!(handle.state(), ConnectionState::Closed);

        timeout(Duration::from_secs(2), handle.close())
            .await
            .expect("close must not wait out the backoff");
    }
}
