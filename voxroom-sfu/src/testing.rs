//! In-memory media fakes
//!
//! Channel-backed implementations of the media seam traits, for exercising
//! relay, signaling and lifecycle behaviour without network I/O.

#![allow(clippy::unwrap_used)]

use crate::peer::{MediaPeer, PeerConnector, PeerEventHandler};
use crate::relay::Subscriber;
use crate::track::{InboundTrack, OutboundTrack, TrackKind};
use crate::types::{ClientId, TrackId};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp::header::Header;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;

/// Poll `condition` until it holds, panicking after two seconds
pub async fn eventually(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// A small Opus-looking RTP packet
#[must_use]
pub fn audio_packet(sequence_number: u16) -> Packet {
    Packet {
        header: Header {
            version: 2,
            payload_type: 111,
            sequence_number,
            ..Default::default()
        },
        payload: Bytes::from_static(b"\xfc\xff\xfe"),
    }
}

#[must_use]
pub fn opus_codec() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_OPUS.to_owned(),
        clock_rate: 48000,
        channels: 2,
        ..Default::default()
    }
}

/// Coerce fake subscribers into relay listeners
#[must_use]
pub fn listeners(subscribers: &[&Arc<FakeSubscriber>]) -> Vec<Arc<dyn Subscriber>> {
    subscribers
        .iter()
        .map(|s| Arc::clone(s) as Arc<dyn Subscriber>)
        .collect()
}

/// Inbound track fed by an unbounded channel; dropping the sender ends it
pub struct FakeInboundTrack {
    id: TrackId,
    kind: TrackKind,
    packets: tokio::sync::Mutex<mpsc::UnboundedReceiver<Packet>>,
}

impl FakeInboundTrack {
    #[must_use]
    pub fn audio(id: &str) -> (Arc<Self>, mpsc::UnboundedSender<Packet>) {
        Self::new(id, TrackKind::Audio)
    }

    #[must_use]
    pub fn video(id: &str) -> (Arc<Self>, mpsc::UnboundedSender<Packet>) {
        Self::new(id, TrackKind::Video)
    }

    fn new(id: &str, kind: TrackKind) -> (Arc<Self>, mpsc::UnboundedSender<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let track = Arc::new(Self {
            id: TrackId::from(id),
            kind,
            packets: tokio::sync::Mutex::new(rx),
        });
        (track, tx)
    }
}

#[async_trait]
impl InboundTrack for FakeInboundTrack {
    fn id(&self) -> TrackId {
        self.id.clone()
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn codec(&self) -> RTCRtpCodecCapability {
        opus_codec()
    }

    async fn read_rtp(&self) -> Result<Packet> {
        self.packets
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| anyhow!("track ended"))
    }
}

/// Outbound track that records what was written to it
#[derive(Default)]
pub struct FakeOutboundTrack {
    publisher: Option<ClientId>,
    written: Mutex<Vec<Packet>>,
    detached: AtomicBool,
    fail_writes: AtomicBool,
}

impl FakeOutboundTrack {
    #[must_use]
    pub fn publisher(&self) -> Option<&ClientId> {
        self.publisher.as_ref()
    }

    #[must_use]
    pub fn written(&self) -> usize {
        self.written.lock().len()
    }

    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    /// Make every further write fail
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl OutboundTrack for FakeOutboundTrack {
    async fn write_rtp(&self, packet: &Packet) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("broken pipe");
        }
        self.written.lock().push(packet.clone());
        Ok(())
    }

    async fn detach(&self) -> Result<()> {
        self.detached.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct NoopHandler;

#[async_trait]
impl PeerEventHandler for NoopHandler {
    async fn on_ice_candidate(&self, _candidate: RTCIceCandidateInit) {}

    async fn on_track(&self, _track: Arc<dyn InboundTrack>) {}
}

/// Peer connection double
pub struct FakePeer {
    handler: Arc<dyn PeerEventHandler>,
    offers: Mutex<Vec<RTCSessionDescription>>,
    candidates: Mutex<Vec<RTCIceCandidateInit>>,
    outbound: Mutex<Vec<Arc<FakeOutboundTrack>>>,
    fail_offer: AtomicBool,
    fail_attach: AtomicBool,
    closed: AtomicBool,
}

impl FakePeer {
    #[must_use]
    pub fn new(handler: Arc<dyn PeerEventHandler>) -> Arc<Self> {
        Arc::new(Self {
            handler,
            offers: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            outbound: Mutex::new(Vec::new()),
            fail_offer: AtomicBool::new(false),
            fail_attach: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// A peer whose events go nowhere
    #[must_use]
    pub fn detached() -> Arc<Self> {
        Self::new(Arc::new(NoopHandler))
    }

    /// Raise `on_track` as if the client started sending `track`
    pub async fn emit_track(&self, track: Arc<dyn InboundTrack>) {
        self.handler.on_track(track).await;
    }

    /// Raise `on_ice_candidate` with a host candidate
    pub async fn emit_candidate(&self, candidate: &str) {
        self.handler
            .on_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.to_owned(),
                sdp_mid: Some("0".to_owned()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            })
            .await;
    }

    pub fn fail_offers(&self) {
        self.fail_offer.store(true, Ordering::SeqCst);
    }

    pub fn fail_attach(&self) {
        self.fail_attach.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn offers(&self) -> usize {
        self.offers.lock().len()
    }

    #[must_use]
    pub fn candidates(&self) -> Vec<RTCIceCandidateInit> {
        self.candidates.lock().clone()
    }

    #[must_use]
    pub fn outbound(&self, index: usize) -> Option<Arc<FakeOutboundTrack>> {
        self.outbound.lock().get(index).cloned()
    }

    #[must_use]
    pub fn outbound_count(&self) -> usize {
        self.outbound.lock().len()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaPeer for FakePeer {
    async fn apply_offer(&self, offer: RTCSessionDescription) -> Result<RTCSessionDescription> {
        if self.fail_offer.load(Ordering::SeqCst) {
            bail!("set_remote_description failed: malformed sdp");
        }
        let mut answer = RTCSessionDescription::default();
        answer.sdp_type = RTCSdpType::Answer;
        answer.sdp = format!("answer-to:{}", offer.sdp);
        self.offers.lock().push(offer);
        Ok(answer)
    }

    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            bail!("peer connection closed");
        }
        self.candidates.lock().push(candidate);
        Ok(())
    }

    async fn add_outbound_track(
        &self,
        _codec: RTCRtpCodecCapability,
        publisher: &ClientId,
    ) -> Result<Arc<dyn OutboundTrack>> {
        if self.fail_attach.load(Ordering::SeqCst) {
            bail!("add_track failed");
        }
        let track = Arc::new(FakeOutboundTrack {
            publisher: Some(publisher.clone()),
            ..Default::default()
        });
        self.outbound.lock().push(Arc::clone(&track));
        Ok(track)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector handing out [`FakePeer`]s and remembering them
#[derive(Default)]
pub struct FakeConnector {
    peers: Mutex<Vec<Arc<FakePeer>>>,
    fail: AtomicBool,
}

impl FakeConnector {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every further `create` fail
    pub fn fail_creates(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn peers(&self) -> Vec<Arc<FakePeer>> {
        self.peers.lock().clone()
    }

    #[must_use]
    pub fn peer(&self, index: usize) -> Option<Arc<FakePeer>> {
        self.peers.lock().get(index).cloned()
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn create(&self, handler: Arc<dyn PeerEventHandler>) -> Result<Arc<dyn MediaPeer>> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("ice gatherer unavailable");
        }
        let peer = FakePeer::new(handler);
        self.peers.lock().push(Arc::clone(&peer));
        Ok(peer)
    }
}

/// Standalone relay participant with its own preference tables
pub struct FakeSubscriber {
    id: ClientId,
    peer: Mutex<Option<Arc<FakePeer>>>,
    muted: Mutex<HashMap<ClientId, bool>>,
    volumes: Mutex<HashMap<ClientId, f64>>,
    token: CancellationToken,
}

impl FakeSubscriber {
    #[must_use]
    pub fn with_peer(id: &str) -> Arc<Self> {
        let subscriber = Self::without_peer(id);
        subscriber.attach_peer(FakePeer::detached());
        subscriber
    }

    #[must_use]
    pub fn without_peer(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: ClientId::from(id),
            peer: Mutex::new(None),
            muted: Mutex::new(HashMap::new()),
            volumes: Mutex::new(HashMap::new()),
            token: CancellationToken::new(),
        })
    }

    pub fn attach_peer(&self, peer: Arc<FakePeer>) {
        *self.peer.lock() = Some(peer);
    }

    /// # Panics
    /// If no peer is attached.
    #[must_use]
    pub fn fake_peer(&self) -> Arc<FakePeer> {
        self.peer.lock().clone().unwrap()
    }

    pub fn set_muted(&self, publisher: &ClientId, muted: bool) {
        self.muted.lock().insert(publisher.clone(), muted);
    }

    pub fn set_volume(&self, publisher: &ClientId, volume: f64) {
        self.volumes.lock().insert(publisher.clone(), volume);
    }
}

impl Subscriber for FakeSubscriber {
    fn client_id(&self) -> &ClientId {
        &self.id
    }

    fn peer(&self) -> Option<Arc<dyn MediaPeer>> {
        self.peer
            .lock()
            .clone()
            .map(|peer| peer as Arc<dyn MediaPeer>)
    }

    fn is_muted(&self, publisher: &ClientId) -> bool {
        self.muted.lock().get(publisher).copied().unwrap_or(false)
    }

    fn volume(&self, publisher: &ClientId) -> f64 {
        self.volumes.lock().get(publisher).copied().unwrap_or(1.0)
    }

    fn lifetime(&self) -> CancellationToken {
        self.token.clone()
    }
}
