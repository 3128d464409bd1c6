//! WebSocket signaling endpoint
//!
//! Adapts an axum WebSocket to the core's transport traits: inbound frames
//! are decoded into [`SignalingMessage`]s, outbound messages go through a
//! bounded queue drained by a writer task. All protocol logic lives in
//! [`ConnectionManager::run`](voxroom_core::service::ConnectionManager::run).

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{stream::SplitStream, SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use voxroom_core::models::UserId;
use voxroom_core::service::{RecvError, SignalSink, SignalTransport, SignalingMessage};

use super::middleware::AuthUser;
use super::AppState;

/// Inbound half of a signaling WebSocket
struct WebSocketTransport {
    receiver: SplitStream<WebSocket>,
}

#[async_trait]
impl SignalTransport for WebSocketTransport {
    async fn recv(&mut self) -> Option<Result<SignalingMessage, RecvError>> {
        loop {
            match self.receiver.next().await {
                Some(Ok(Message::Text(text))) => return Some(decode(text.as_bytes())),
                Some(Ok(Message::Binary(bytes))) => return Some(decode(&bytes)),
                Some(Ok(Message::Close(_))) => return None, // Graceful close
                Some(Err(e)) => return Some(Err(RecvError::Transport(e.to_string()))),
                None => return None, // Stream ended
                Some(Ok(_)) => {
                    // Ping/pong are answered by axum; keep reading
                }
            }
        }
    }
}

fn decode(bytes: &[u8]) -> Result<SignalingMessage, RecvError> {
    serde_json::from_slice(bytes).map_err(|e| RecvError::Malformed(e.to_string()))
}

/// Outbound half of a signaling WebSocket
///
/// Closing drops the queue's sender, so the writer task flushes whatever is
/// queued and then closes the socket.
struct WebSocketSink {
    sender: Mutex<Option<mpsc::Sender<SignalingMessage>>>,
}

impl WebSocketSink {
    fn new(sender: mpsc::Sender<SignalingMessage>) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }
}

impl SignalSink for WebSocketSink {
    fn send(&self, message: SignalingMessage) -> bool {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return false;
        };
        // try_send gives backpressure for slow clients: a full queue drops the message
        match sender.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(message)) => {
                warn!(kind = %message.kind, "Send queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    fn close(&self) {
        self.sender.lock().take();
    }
}

/// WebSocket signaling handler
///
/// The token is checked before the upgrade, so unauthenticated requests get
/// a plain 401.
pub async fn websocket_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let max_message_bytes = state.signaling_config.max_message_bytes;
    ws.max_message_size(max_message_bytes)
        .on_failed_upgrade(|e| warn!(error = %e, "WebSocket upgrade failed"))
        .on_upgrade(move |socket| handle_socket(socket, state, auth.user_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: UserId) {
    info!(user_id = %user_id, "WebSocket connection established");

    let (tx, mut rx) = mpsc::channel::<SignalingMessage>(state.signaling_config.send_queue_capacity.max(1));
    let (mut ws_sender, ws_receiver) = socket.split();

    // Server messages -> WebSocket
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match message.encode() {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode signaling message: {}", e);
                    continue;
                }
            };
            if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                debug!("Failed to send WebSocket message: {}", e);
                return;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
        let _ = ws_sender.close().await;
    });

    let transport = WebSocketTransport {
        receiver: ws_receiver,
    };
    let sink = std::sync::Arc::new(WebSocketSink::new(tx));
    state
        .connection_manager
        .run(user_id.clone(), transport, sink)
        .await;

    if let Err(e) = writer.await {
        error!("WebSocket writer task failed: {}", e);
    }

    info!(user_id = %user_id, "WebSocket connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxroom_core::service::MessageKind;

    #[test]
    fn test_decode_frames() {
        let message = decode(br#"{"type":"join","roomId":"lobby"}"#).unwrap();
        assert_eq!(message.kind, MessageKind::Join);
        assert_eq!(message.room_id.as_deref(), Some("lobby"));

        assert!(matches!(decode(b"not json"), Err(RecvError::Malformed(_))));
        assert!(matches!(decode(br#"{"roomId":"lobby"}"#), Err(RecvError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_sink_queues_until_closed() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = WebSocketSink::new(tx);

        assert!(sink.send(SignalingMessage::error("first")));
        assert!(!sink.send(SignalingMessage::error("queue full")));

        sink.close();
        assert!(!sink.send(SignalingMessage::error("after close")));

        assert_eq!(rx.recv().await.unwrap().message.as_deref(), Some("first"));
        assert!(rx.recv().await.is_none());
    }
}
