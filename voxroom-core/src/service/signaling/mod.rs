//! Signaling state machine
//!
//! [`SignalingService::apply`] interprets one inbound message against the
//! caller's session and returns the response to send, if any. Errors are
//! reported to the caller as `error` messages by the connection manager and
//! never end the session on their own.

mod handler;
mod message;

pub use handler::ClientPeerHandler;
pub use message::{MessageKind, SignalingMessage};

use std::sync::Arc;
use tracing::{debug, info, warn};
use voxroom_sfu::webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use voxroom_sfu::{ClientId, MediaPeer, PeerConnector, RelayEngine};

use super::connections::ConnectionRegistry;
use super::registry::RoomRegistry;
use super::session::{Client, MAX_PREFERENCE_TARGETS};
use super::transport::SignalSink;
use crate::models::{RoomId, RoomRecord, UserId};
use crate::{metrics, Error, Result};

/// Signaling service
///
/// Owns no state of its own; every call goes through the shared registries.
pub struct SignalingService {
    registry: Arc<RoomRegistry>,
    connections: Arc<ConnectionRegistry>,
    relay: Arc<RelayEngine>,
    connector: Arc<dyn PeerConnector>,
}

impl SignalingService {
    #[must_use]
    pub fn new(
        registry: Arc<RoomRegistry>,
        connections: Arc<ConnectionRegistry>,
        relay: Arc<RelayEngine>,
        connector: Arc<dyn PeerConnector>,
    ) -> Self {
        Self {
            registry,
            connections,
            relay,
            connector,
        }
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    #[must_use]
    pub const fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    #[must_use]
    pub const fn relay(&self) -> &Arc<RelayEngine> {
        &self.relay
    }

    /// Accept a `join` and register a new session for `user_id`.
    ///
    /// The client ID is always generated here; any `clientId` in the message
    /// is ignored.
    pub async fn join(
        &self,
        user_id: UserId,
        message: &SignalingMessage,
        sink: Arc<dyn SignalSink>,
    ) -> Result<(Arc<Client>, SignalingMessage)> {
        let raw = message
            .room_id
            .as_deref()
            .ok_or_else(|| Error::Protocol("roomId is required".to_string()))?;
        let room_id = RoomId::parse(raw).map_err(Error::Protocol)?;

        let client = Client::new(ClientId::generate(), room_id, user_id, sink);
        let participants = self.registry.join(Arc::clone(&client)).await;
        self.connections.insert(Arc::clone(&client));

        let response = SignalingMessage::joined(client.id().clone(), participants);
        Ok((client, response))
    }

    /// Apply one message from an already joined client.
    ///
    /// `Ok(None)` means there is nothing to send back.
    pub async fn apply(
        &self,
        client: &Arc<Client>,
        message: SignalingMessage,
    ) -> Result<Option<SignalingMessage>> {
        match message.kind {
            MessageKind::Join => Err(Error::Protocol("already joined".to_string())),
            MessageKind::Offer => self.handle_offer(client, message).await.map(Some),
            MessageKind::Candidate => self.handle_candidate(client, message).await,
            MessageKind::Mute | MessageKind::Unmute => {
                let target = required_target(&message)?;
                let muted = message.kind == MessageKind::Mute;
                if !client.set_muted(&target, muted) {
                    return Err(preference_limit());
                }
                let ack = if muted {
                    MessageKind::MuteAck
                } else {
                    MessageKind::UnmuteAck
                };
                Ok(Some(SignalingMessage::ack(ack, target)))
            }
            MessageKind::SetVolume => {
                let target = required_target(&message)?;
                let volume = message
                    .volume
                    .ok_or_else(|| Error::Protocol("volume is required".to_string()))?;
                if !client.can_store_preference(&target) {
                    return Err(preference_limit());
                }
                if !client.set_volume(&target, volume) {
                    warn!(
                        client_id = %client.id(),
                        target = %target,
                        volume,
                        "Ignoring out-of-range volume"
                    );
                }
                let current = client.volume_for(&target);
                Ok(Some(SignalingMessage::volume_ack(target, current)))
            }
            MessageKind::GetParticipants => {
                let participants = self
                    .registry
                    .participants(client.room_id())
                    .ok_or_else(|| Error::NotFound(format!("room {}", client.room_id())))?;
                Ok(Some(SignalingMessage::participants(participants)))
            }
            MessageKind::CreateRoom => {
                let record = self
                    .create_room(client.user_id(), message.room_id, message.name)
                    .await?;
                Ok(Some(room_created(&record)))
            }
            kind => {
                debug!(client_id = %client.id(), kind = %kind, "No handler for message kind");
                Ok(None)
            }
        }
    }

    async fn handle_offer(&self, client: &Arc<Client>, message: SignalingMessage) -> Result<SignalingMessage> {
        let offer = message
            .sdp
            .ok_or_else(|| Error::Protocol("sdp is required".to_string()))?;
        if offer.sdp_type != RTCSdpType::Offer {
            return Err(Error::Protocol(format!(
                "expected an offer, got {}",
                offer.sdp_type
            )));
        }

        let peer = self.ensure_peer(client).await?;
        let answer = peer
            .apply_offer(offer)
            .await
            .map_err(|e| Error::Negotiation(format!("process offer: {e:#}")))?;

        debug!(client_id = %client.id(), "Answer created");
        Ok(SignalingMessage::answer(answer))
    }

    /// Existing peer, or a new one wired to this client's events
    async fn ensure_peer(&self, client: &Arc<Client>) -> Result<Arc<dyn MediaPeer>> {
        if let Some(peer) = client.media_peer() {
            return Ok(peer);
        }

        let handler = Arc::new(ClientPeerHandler::new(
            client,
            Arc::clone(&self.registry),
            Arc::clone(&self.relay),
        ));
        let peer = self
            .connector
            .create(handler)
            .await
            .map_err(|e| Error::Negotiation(format!("create peer connection: {e:#}")))?;

        if client.is_closed() {
            if let Err(e) = peer.close().await {
                debug!(client_id = %client.id(), error = %e, "Failed to close orphaned peer");
            }
            return Err(Error::Transport("session closed".to_string()));
        }

        client.set_media_peer(Arc::clone(&peer));
        info!(client_id = %client.id(), room_id = %client.room_id(), "Peer connection created");
        Ok(peer)
    }

    async fn handle_candidate(
        &self,
        client: &Arc<Client>,
        message: SignalingMessage,
    ) -> Result<Option<SignalingMessage>> {
        let candidate = message
            .candidate
            .ok_or_else(|| Error::Protocol("candidate is required".to_string()))?;
        let peer = client
            .media_peer()
            .ok_or_else(|| Error::Policy("peer connection not initialized".to_string()))?;
        peer.add_ice_candidate(candidate)
            .await
            .map_err(|e| Error::Negotiation(format!("add ICE candidate: {e:#}")))?;
        Ok(None)
    }

    /// Create a durable room owned by `owner`.
    ///
    /// With a room store the record is persisted first; without one the room
    /// only lives in this process.
    pub async fn create_room(
        &self,
        owner: &UserId,
        room_id: Option<String>,
        name: Option<String>,
    ) -> Result<RoomRecord> {
        let room_id = match room_id.as_deref() {
            Some(raw) => RoomId::parse(raw).map_err(Error::InvalidInput)?,
            None => RoomId::generate(),
        };
        let name = match name.as_deref() {
            Some(raw) => RoomRecord::parse_name(raw).map_err(Error::InvalidInput)?,
            None => None,
        }
        .unwrap_or_else(|| room_id.to_string());
        let record = RoomRecord::new(room_id, name, owner.clone());

        let record = match self.registry.store() {
            Some(store) => store.create_room(&record).await?,
            None => {
                if self
                    .registry
                    .get(&record.id)
                    .is_some_and(|room| room.is_durable())
                {
                    return Err(Error::AlreadyExists("room already exists".to_string()));
                }
                record
            }
        };
        self.registry.register_durable(record.clone());

        info!(room_id = %record.id, owner_id = %owner, name = %record.name, "Room created");
        Ok(record)
    }

    /// Tear down a session. Only the first call for a client does anything.
    pub async fn leave(&self, client: &Arc<Client>) -> bool {
        if !client.mark_closed() {
            return false;
        }

        client.token().cancel();
        let paths = self.relay.cancel_paths_for(client.id());

        if let Some(peer) = client.take_media_peer() {
            if let Err(e) = peer.close().await {
                warn!(client_id = %client.id(), error = %e, "Failed to close peer connection");
            }
        }

        self.registry.remove(client);
        self.connections.remove(client.id());
        for peer in self.registry.snapshot(client.room_id()).unwrap_or_default() {
            peer.forget(client.id());
        }

        let duration = client.session_duration();
        metrics::signaling::SESSION_DURATION.observe(duration.as_secs_f64());
        info!(
            client_id = %client.id(),
            room_id = %client.room_id(),
            user_id = %client.user_id(),
            paths,
            duration_secs = duration.as_secs(),
            "Client left"
        );
        true
    }
}

fn preference_limit() -> Error {
    Error::Policy(format!(
        "mute and volume settings are limited to {MAX_PREFERENCE_TARGETS} clients"
    ))
}

fn required_target(message: &SignalingMessage) -> Result<ClientId> {
    message
        .target_client_id
        .clone()
        .ok_or_else(|| Error::Protocol("targetClientId is required".to_string()))
}

/// `room_created` response for `record`
#[must_use]
pub fn room_created(record: &RoomRecord) -> SignalingMessage {
    SignalingMessage::room_created(record.id.to_string(), "Room created successfully")
}
