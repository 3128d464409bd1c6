//! Peer connection seam
//!
//! A [`MediaPeer`] is the server side of one client's WebRTC session. It is
//! created lazily by a [`PeerConnector`] on the client's first offer, and
//! reports asynchronous events (trickled candidates, new remote tracks) back
//! through the [`PeerEventHandler`] it was created with.

use crate::track::{InboundTrack, OutboundTrack};
use crate::types::ClientId;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

/// Callbacks raised by a peer connection
///
/// Implementations must not block; heavy work belongs on a spawned task.
#[async_trait]
pub trait PeerEventHandler: Send + Sync {
    /// A local ICE candidate was gathered and should be trickled to the client
    async fn on_ice_candidate(&self, candidate: RTCIceCandidateInit);

    /// The client started sending a track
    async fn on_track(&self, track: Arc<dyn InboundTrack>);
}

/// Server side of one client's WebRTC session
#[async_trait]
pub trait MediaPeer: Send + Sync {
    /// Apply a remote offer and return the local answer
    async fn apply_offer(&self, offer: RTCSessionDescription) -> Result<RTCSessionDescription>;

    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()>;

    /// Attach a new outbound track carrying `publisher`'s media
    async fn add_outbound_track(
        &self,
        codec: RTCRtpCodecCapability,
        publisher: &ClientId,
    ) -> Result<Arc<dyn OutboundTrack>>;

    async fn close(&self) -> Result<()>;
}

/// Factory for [`MediaPeer`]s
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn create(&self, handler: Arc<dyn PeerEventHandler>) -> Result<Arc<dyn MediaPeer>>;
}
