//! Connection lifecycle
//!
//! Drives one signaling connection from its first frame to cleanup:
//! `Connecting` accepts only `join` (or a one-shot `create_room`), after
//! which every message goes through [`SignalingService::apply`] until the
//! transport ends. Cleanup runs through [`SignalingService::leave`], which is
//! idempotent.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::session::Client;
use super::signaling::{room_created, MessageKind, SignalingMessage, SignalingService};
use super::transport::{RecvError, SignalSink, SignalTransport};
use crate::models::UserId;
use crate::{record_signaling_error, record_signaling_message, Error};

pub struct ConnectionManager {
    signaling: Arc<SignalingService>,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(signaling: Arc<SignalingService>, shutdown: CancellationToken) -> Self {
        Self { signaling, shutdown }
    }

    #[must_use]
    pub const fn signaling(&self) -> &Arc<SignalingService> {
        &self.signaling
    }

    /// Serve one connection for `user_id` until it closes
    pub async fn run<T: SignalTransport>(
        &self,
        user_id: UserId,
        mut transport: T,
        sink: Arc<dyn SignalSink>,
    ) {
        if let Some(client) = self.handshake(&user_id, &mut transport, &sink).await {
            self.serve(&client, &mut transport).await;
            self.signaling.leave(&client).await;
        }
        sink.close();
    }

    /// `Connecting` state: returns the joined client, or `None` if the
    /// connection should close
    async fn handshake<T: SignalTransport>(
        &self,
        user_id: &UserId,
        transport: &mut T,
        sink: &Arc<dyn SignalSink>,
    ) -> Option<Arc<Client>> {
        let first = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => return None,
            frame = transport.recv() => frame,
        };

        let message = match first {
            None => {
                debug!(user_id = %user_id, "Connection closed before join");
                return None;
            }
            Some(Err(RecvError::Transport(e))) => {
                debug!(user_id = %user_id, error = %e, "Transport failed before join");
                return None;
            }
            Some(Err(RecvError::Malformed(e))) => {
                warn!(user_id = %user_id, error = %e, "Malformed first message");
                self.reject(sink, &Error::Protocol(format!("malformed message: {e}")));
                return None;
            }
            Some(Ok(message)) => message,
        };
        record_signaling_message!(message.kind.as_str());

        match message.kind {
            MessageKind::Join => {
                match self.signaling.join(user_id.clone(), &message, Arc::clone(sink)).await {
                    Ok((client, response)) => {
                        client.send(response);
                        Some(client)
                    }
                    Err(e) => {
                        warn!(user_id = %user_id, error = %e, "Join rejected");
                        self.reject(sink, &e);
                        None
                    }
                }
            }
            MessageKind::CreateRoom => {
                match self
                    .signaling
                    .create_room(user_id, message.room_id, message.name)
                    .await
                {
                    Ok(record) => {
                        sink.send(room_created(&record));
                    }
                    Err(e) => self.reject(sink, &e),
                }
                None
            }
            kind => {
                warn!(user_id = %user_id, kind = %kind, "First message was not join");
                self.reject(
                    sink,
                    &Error::Protocol("Invalid initial message type".to_string()),
                );
                None
            }
        }
    }

    /// `Joined`/`Active` states: apply messages in arrival order
    async fn serve<T: SignalTransport>(&self, client: &Arc<Client>, transport: &mut T) {
        let token = client.token().clone();
        loop {
            let frame = tokio::select! {
                biased;
                () = token.cancelled() => break,
                () = self.shutdown.cancelled() => {
                    info!(client_id = %client.id(), "Closing connection for shutdown");
                    break;
                }
                frame = transport.recv() => frame,
            };

            let message = match frame {
                None => {
                    debug!(client_id = %client.id(), "Connection closed by client");
                    break;
                }
                Some(Err(RecvError::Transport(e))) => {
                    debug!(client_id = %client.id(), error = %e, "Transport error");
                    break;
                }
                Some(Err(RecvError::Malformed(e))) => {
                    let err = Error::Protocol(format!("malformed message: {e}"));
                    record_signaling_error!(err);
                    client.send(SignalingMessage::error(err.to_string()));
                    continue;
                }
                Some(Ok(message)) => message,
            };

            record_signaling_message!(message.kind.as_str());
            let kind = message.kind;
            match self.signaling.apply(client, message).await {
                Ok(Some(response)) => {
                    client.send(response);
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(client_id = %client.id(), kind = %kind, error = %e, "Message rejected");
                    record_signaling_error!(e);
                    client.send(SignalingMessage::error(e.to_string()));
                }
            }
        }
    }

    fn reject(&self, sink: &Arc<dyn SignalSink>, error: &Error) {
        record_signaling_error!(error);
        sink.send(SignalingMessage::error(error.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::connections::ConnectionRegistry;
    use crate::service::registry::RoomRegistry;
    use crate::service::session::tests::RecordingSink;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::Ordering;
    use voxroom_sfu::testing::FakeConnector;
    use voxroom_sfu::{RelayConfig, RelayEngine};

    /// Transport replaying a fixed script, then ending
    struct Script(VecDeque<Result<SignalingMessage, RecvError>>);

    impl Script {
        fn new(frames: Vec<Result<SignalingMessage, RecvError>>) -> Self {
            Self(frames.into())
        }
    }

    #[async_trait]
    impl SignalTransport for Script {
        async fn recv(&mut self) -> Option<Result<SignalingMessage, RecvError>> {
            self.0.pop_front()
        }
    }

    fn manager() -> ConnectionManager {
        let signaling = SignalingService::new(
            Arc::new(RoomRegistry::new(None)),
            Arc::new(ConnectionRegistry::new()),
            RelayEngine::new(RelayConfig::default()),
            FakeConnector::new(),
        );
        ConnectionManager::new(Arc::new(signaling), CancellationToken::new())
    }

    async fn run(manager: &ConnectionManager, frames: Vec<Result<SignalingMessage, RecvError>>) -> Arc<RecordingSink> {
        let sink = Arc::new(RecordingSink::default());
        manager
            .run(UserId::from("u1"), Script::new(frames), sink.clone())
            .await;
        sink
    }

    #[tokio::test]
    async fn test_non_join_first_message_closes() {
        let manager = manager();
        let sink = run(
            &manager,
            vec![
                Ok(SignalingMessage::new(MessageKind::GetParticipants)),
                Ok(SignalingMessage::join("lobby")),
            ],
        )
        .await;

        assert_eq!(sink.kinds(), vec![MessageKind::Error]);
        assert_eq!(
            sink.sent.lock()[0].message.as_deref(),
            Some("Protocol error: Invalid initial message type")
        );
        assert!(sink.closed.load(Ordering::SeqCst));
        assert_eq!(manager.signaling().registry().room_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_first_frame_closes_with_error() {
        let manager = manager();
        let sink = run(&manager, vec![Err(RecvError::Malformed("expected value".to_string()))]).await;
        assert_eq!(sink.kinds(), vec![MessageKind::Error]);
        assert!(sink.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_session_survives_bad_messages_and_cleans_up() {
        let manager = manager();
        let sink = run(
            &manager,
            vec![
                Ok(SignalingMessage::join("lobby")),
                Err(RecvError::Malformed("expected value".to_string())),
                Ok(SignalingMessage::new(MessageKind::Candidate)),
                Ok(SignalingMessage::new(MessageKind::GetParticipants)),
                Ok(SignalingMessage::new(MessageKind::Unknown)),
            ],
        )
        .await;

        assert_eq!(
            sink.kinds(),
            vec![
                MessageKind::Participants,
                MessageKind::Error,
                MessageKind::Error,
                MessageKind::Participants,
            ]
        );
        assert!(sink.closed.load(Ordering::SeqCst));
        assert_eq!(manager.signaling().registry().room_count(), 0);
        assert!(manager.signaling().connections().is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_triggers_cleanup() {
        let manager = manager();
        run(
            &manager,
            vec![
                Ok(SignalingMessage::join("lobby")),
                Err(RecvError::Transport("connection reset".to_string())),
                Ok(SignalingMessage::new(MessageKind::GetParticipants)),
            ],
        )
        .await;
        assert_eq!(manager.signaling().registry().client_count(), 0);
    }

    #[tokio::test]
    async fn test_create_room_then_close() {
        let manager = manager();
        let mut create = SignalingMessage::new(MessageKind::CreateRoom);
        create.room_id = Some("standup".to_string());

        let sink = run(&manager, vec![Ok(create), Ok(SignalingMessage::join("standup"))]).await;

        assert_eq!(sink.kinds(), vec![MessageKind::RoomCreated]);
        assert!(manager
            .signaling()
            .registry()
            .get(&"standup".into())
            .is_some_and(|room| room.is_durable() && room.is_empty()));
    }

    #[tokio::test]
    async fn test_shutdown_ends_sessions() {
        let manager = manager();
        manager.shutdown.cancel();
        let sink = run(&manager, vec![Ok(SignalingMessage::join("lobby"))]).await;
        assert!(sink.kinds().is_empty());
        assert!(sink.closed.load(Ordering::SeqCst));
    }
}
