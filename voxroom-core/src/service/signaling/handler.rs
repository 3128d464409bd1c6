//! Peer event wiring for one client
//!
//! Holds the owning client weakly so a peer connection never keeps a closed
//! session alive.

use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tracing::{debug, info};
use voxroom_sfu::webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use voxroom_sfu::{InboundTrack, PeerEventHandler, RelayEngine, Subscriber};

use super::SignalingMessage;
use crate::service::registry::RoomRegistry;
use crate::service::session::Client;

pub struct ClientPeerHandler {
    client: Weak<Client>,
    registry: Arc<RoomRegistry>,
    relay: Arc<RelayEngine>,
}

impl ClientPeerHandler {
    #[must_use]
    pub fn new(client: &Arc<Client>, registry: Arc<RoomRegistry>, relay: Arc<RelayEngine>) -> Self {
        Self {
            client: Arc::downgrade(client),
            registry,
            relay,
        }
    }
}

#[async_trait]
impl PeerEventHandler for ClientPeerHandler {
    async fn on_ice_candidate(&self, candidate: RTCIceCandidateInit) {
        let Some(client) = self.client.upgrade() else {
            return;
        };
        if client.is_closed() {
            return;
        }
        if !client.send(SignalingMessage::candidate(candidate)) {
            debug!(client_id = %client.id(), "Dropped local ICE candidate, send queue unavailable");
        }
    }

    async fn on_track(&self, track: Arc<dyn InboundTrack>) {
        let Some(client) = self.client.upgrade() else {
            return;
        };
        if client.is_closed() {
            return;
        }

        let listeners: Vec<Arc<dyn Subscriber>> = self
            .registry
            .snapshot(client.room_id())
            .unwrap_or_default()
            .into_iter()
            .map(|listener| listener as Arc<dyn Subscriber>)
            .collect();

        info!(
            client_id = %client.id(),
            room_id = %client.room_id(),
            track_id = %track.id(),
            kind = ?track.kind(),
            listeners = listeners.len(),
            "Inbound track received"
        );

        let relay = Arc::clone(&self.relay);
        let publisher: Arc<dyn Subscriber> = client;
        tokio::spawn(async move {
            relay.publish(publisher, track, listeners).await;
        });
    }
}
