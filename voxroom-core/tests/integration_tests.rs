//! Integration tests for voxroom-core services
//!
//! Drives whole signaling sessions through [`ConnectionManager::run`] over
//! in-memory channels, with the media engine replaced by the SFU fakes.
//!
//! Run with: cargo test --test integration_tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use voxroom_core::{
    bootstrap::Services,
    models::{RoomId, UserId},
    repository::{MemoryRoomStore, RoomStore},
    service::{MessageKind, RecvError, SignalSink, SignalTransport, SignalingMessage},
    Config,
};
use voxroom_sfu::testing::{audio_packet, eventually, FakeConnector, FakeInboundTrack};
use voxroom_sfu::webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use voxroom_sfu::webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use voxroom_sfu::ClientId;

type Frame = Result<SignalingMessage, RecvError>;

struct ChannelTransport(mpsc::UnboundedReceiver<Frame>);

#[async_trait]
impl SignalTransport for ChannelTransport {
    async fn recv(&mut self) -> Option<Frame> {
        self.0.recv().await
    }
}

struct ChannelSink {
    tx: mpsc::UnboundedSender<SignalingMessage>,
    closed: Arc<AtomicBool>,
}

impl SignalSink for ChannelSink {
    fn send(&self, message: SignalingMessage) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.tx.send(message).is_ok()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Client end of one simulated connection
struct Conn {
    tx: mpsc::UnboundedSender<Frame>,
    rx: mpsc::UnboundedReceiver<SignalingMessage>,
    closed: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Conn {
    fn open(services: &Services, user: &str) -> Self {
        let (tx, inbound) = mpsc::unbounded_channel();
        let (outbound, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let sink = Arc::new(ChannelSink {
            tx: outbound,
            closed: Arc::clone(&closed),
        });

        let manager = Arc::clone(&services.connection_manager);
        let user_id = UserId::from(user);
        let task = tokio::spawn(async move {
            manager.run(user_id, ChannelTransport(inbound), sink).await;
        });

        Self { tx, rx, closed, task }
    }

    fn send(&self, message: SignalingMessage) {
        self.tx.send(Ok(message)).unwrap();
    }

    async fn next(&mut self) -> SignalingMessage {
        tokio::time::timeout(Duration::from_secs(2), self.rx.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("connection closed")
    }

    async fn request(&mut self, message: SignalingMessage) -> SignalingMessage {
        self.send(message);
        self.next().await
    }

    /// Join `room` and return the assigned client ID
    async fn join(&mut self, room: &str) -> ClientId {
        let response = self.request(SignalingMessage::join(room)).await;
        assert_eq!(response.kind, MessageKind::Participants);
        response.client_id.unwrap()
    }

    /// Close the client side and wait for the server to finish cleanup
    async fn hang_up(self) {
        drop(self.tx);
        tokio::time::timeout(Duration::from_secs(2), self.task)
            .await
            .unwrap()
            .unwrap();
        assert!(self.closed.load(Ordering::SeqCst));
    }
}

fn offer() -> SignalingMessage {
    let mut sdp = RTCSessionDescription::default();
    sdp.sdp_type = RTCSdpType::Offer;
    sdp.sdp = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\n".to_string();
    SignalingMessage::offer(sdp)
}

fn services() -> (Services, Arc<FakeConnector>) {
    let connector = FakeConnector::new();
    let services = Services::new(Config::default(), None, connector.clone()).unwrap();
    (services, connector)
}

#[tokio::test]
async fn test_voice_room_scenario() {
    let (services, connector) = services();

    let mut a = Conn::open(&services, "alice");
    let a_id = a.join("R1").await;
    let mut b = Conn::open(&services, "bob");
    let b_id = b.join("R1").await;

    let answer = a.request(offer()).await;
    assert_eq!(answer.kind, MessageKind::Answer);
    assert!(!answer.sdp.unwrap().sdp.is_empty());
    assert_eq!(b.request(offer()).await.kind, MessageKind::Answer);
    let a_peer = connector.peer(0).unwrap();
    let b_peer = connector.peer(1).unwrap();

    let ack = a
        .request(SignalingMessage::targeting(MessageKind::Mute, b_id.clone()))
        .await;
    assert_eq!(ack.kind, MessageKind::MuteAck);
    assert_eq!(ack.target_client_id, Some(b_id.clone()));

    // B publishes; A muted B, so no path towards A is created
    let (track, _packets) = FakeInboundTrack::audio("b-mic");
    b_peer.emit_track(track).await;
    eventually(|| services.relay.stats().active_publications == 1).await;
    assert_eq!(a_peer.outbound_count(), 0);
    assert_eq!(services.relay.active_paths(), 0);

    b.hang_up().await;
    eventually(|| services.relay.stats().active_publications == 0).await;

    let participants = a
        .request(SignalingMessage::new(MessageKind::GetParticipants))
        .await;
    assert_eq!(participants.participants, Some(vec![a_id]));

    a.hang_up().await;
    assert_eq!(services.registry.room_count(), 0);
    assert!(services.connections.is_empty());
    assert!(a_peer.is_closed());
    assert!(b_peer.is_closed());
}

#[tokio::test]
async fn test_listener_mute_pauses_audio_until_unmute() {
    let (services, connector) = services();

    let mut a = Conn::open(&services, "alice");
    let a_id = a.join("R1").await;
    let mut b = Conn::open(&services, "bob");
    b.join("R1").await;
    a.request(offer()).await;
    b.request(offer()).await;
    let a_peer = connector.peer(0).unwrap();
    let b_peer = connector.peer(1).unwrap();

    let (track, packets) = FakeInboundTrack::audio("a-mic");
    a_peer.emit_track(track).await;
    eventually(|| b_peer.outbound_count() == 1).await;
    let outbound = b_peer.outbound(0).unwrap();
    assert_eq!(outbound.publisher(), Some(&a_id));

    packets.send(audio_packet(1)).unwrap();
    packets.send(audio_packet(2)).unwrap();
    eventually(|| outbound.written() == 2).await;

    let ack = b
        .request(SignalingMessage::targeting(MessageKind::Mute, a_id.clone()))
        .await;
    assert_eq!(ack.kind, MessageKind::MuteAck);

    packets.send(audio_packet(3)).unwrap();
    eventually(|| services.relay.stats().packets_muted == 1).await;
    assert_eq!(outbound.written(), 2);
    assert_eq!(services.relay.active_paths(), 1);
    assert!(!outbound.is_detached());

    let ack = b
        .request(SignalingMessage::targeting(MessageKind::Unmute, a_id.clone()))
        .await;
    assert_eq!(ack.kind, MessageKind::UnmuteAck);

    for seq in 4..8 {
        packets.send(audio_packet(seq)).unwrap();
    }
    eventually(|| outbound.written() == 6).await;
    assert_eq!(b_peer.outbound_count(), 1);

    a.hang_up().await;
    eventually(|| outbound.is_detached()).await;
    eventually(|| services.relay.active_paths() == 0).await;
    b.hang_up().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_share_one_room() {
    let (services, _) = services();
    let mut conns: Vec<Conn> = (0..8)
        .map(|i| Conn::open(&services, &format!("user-{i}")))
        .collect();
    for conn in &conns {
        conn.send(SignalingMessage::join("fresh-room"));
    }
    let mut ids = Vec::new();
    for conn in &mut conns {
        let response = conn.next().await;
        ids.push(response.client_id.unwrap());
    }

    assert_eq!(services.registry.room_count(), 1);
    let mut participants = services
        .registry
        .participants(&RoomId::from("fresh-room"))
        .unwrap();
    participants.sort();
    ids.sort();
    assert_eq!(participants, ids);

    let response = conns[0]
        .request(SignalingMessage::new(MessageKind::GetParticipants))
        .await;
    assert_eq!(response.participants.unwrap().len(), 8);

    for conn in conns {
        conn.hang_up().await;
    }
    assert_eq!(services.registry.room_count(), 0);
}

#[tokio::test]
async fn test_non_join_client_never_joins() {
    let (services, _) = services();
    let mut conn = Conn::open(&services, "mallory");

    let response = conn.request(offer()).await;
    assert_eq!(response.kind, MessageKind::Error);
    // The server may already have dropped its end
    let _ = conn.tx.send(Ok(SignalingMessage::join("R1")));

    tokio::time::timeout(Duration::from_secs(2), conn.task)
        .await
        .unwrap()
        .unwrap();
    assert!(conn.closed.load(Ordering::SeqCst));
    assert_eq!(services.registry.room_count(), 0);
    assert!(services.connections.is_empty());
}

#[tokio::test]
async fn test_volume_out_of_range_is_acked_unchanged() {
    let (services, _) = services();
    let mut a = Conn::open(&services, "alice");
    a.join("R1").await;
    let target = ClientId::from("someone");

    let ack = a
        .request(SignalingMessage::set_volume(target.clone(), 1.5))
        .await;
    assert_eq!(ack.kind, MessageKind::VolumeAck);
    assert_eq!(ack.volume, Some(1.0));

    let ack = a
        .request(SignalingMessage::set_volume(target.clone(), 0.6))
        .await;
    assert_eq!(ack.volume, Some(0.6));

    let ack = a.request(SignalingMessage::set_volume(target, -2.0)).await;
    assert_eq!(ack.volume, Some(0.6));

    a.hang_up().await;
}

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    let (services, connector) = services();
    let mut a = Conn::open(&services, "alice");
    a.join("R1").await;
    a.request(offer()).await;

    services.shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(2), a.task)
        .await
        .unwrap()
        .unwrap();

    assert!(connector.peer(0).unwrap().is_closed());
    assert_eq!(services.registry.client_count(), 0);
}

#[tokio::test]
async fn test_durable_room_from_store() {
    let connector = FakeConnector::new();
    let store = Arc::new(MemoryRoomStore::new());
    let services = Services::new(
        Config::default(),
        Some(store.clone() as Arc<dyn RoomStore>),
        connector,
    ).unwrap();

    let record = services
        .signaling
        .create_room(&UserId::from("owner"), Some("book-club".to_string()), None)
        .await
        .unwrap();
    assert_eq!(record.name, "book-club");

    let mut guest = Conn::open(&services, "guest");
    guest.join("book-club").await;
    assert!(store.is_member(&RoomId::from("book-club"), &UserId::from("guest")));

    guest.hang_up().await;
    let room = services.registry.get(&RoomId::from("book-club")).unwrap();
    assert!(room.is_durable());
    assert!(room.is_empty());
}
