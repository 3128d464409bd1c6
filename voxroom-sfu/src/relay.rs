//! Relay engine
//!
//! For every inbound audio track the engine spawns one reader task that pulls
//! RTP from the publisher and fans it out over a bounded broadcast channel,
//! plus one forwarding task per eligible listener that writes into a fresh
//! outbound track on the listener's peer.
//!
//! A forwarding path ends when the publisher's session, the listener's
//! session or the path itself is cancelled, when the publication ends, or
//! when the outbound write fails. While the listener does not admit the
//! publisher (muted, or volume zero) packets are skipped and the outbound
//! track stays attached, so unmuting resumes the audio. Paths are
//! independent: one failing never touches its siblings.

use crate::config::RelayConfig;
use crate::peer::MediaPeer;
use crate::track::{InboundTrack, OutboundTrack, TrackKind};
use crate::types::{ClientId, PathKey, TrackId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::rtp::packet::Packet;

/// A session that can publish to or listen on the relay
pub trait Subscriber: Send + Sync {
    fn client_id(&self) -> &ClientId;

    /// The session's peer connection, if it has negotiated one
    fn peer(&self) -> Option<Arc<dyn MediaPeer>>;

    fn is_muted(&self, publisher: &ClientId) -> bool;

    /// Listening volume for `publisher` in `[0, 1]`
    fn volume(&self, publisher: &ClientId) -> f64;

    /// Cancelled when the session ends
    fn lifetime(&self) -> CancellationToken;

    /// Whether media from `publisher` should reach this session.
    ///
    /// Volume is advisory: zero is treated as muted, any other value forwards
    /// the packets untouched.
    fn admits(&self, publisher: &ClientId) -> bool {
        !self.is_muted(publisher) && self.volume(publisher) > 0.0
    }
}

struct PathHandle {
    id: u64,
    cancel: CancellationToken,
}

/// Relay counters
#[derive(Default)]
pub struct RelayStats {
    active_publications: AtomicU64,
    active_paths: AtomicU64,
    paths_opened: AtomicU64,
    paths_closed: AtomicU64,
    packets_forwarded: AtomicU64,
    bytes_forwarded: AtomicU64,
    packets_dropped: AtomicU64,
    packets_muted: AtomicU64,
}

impl RelayStats {
    #[must_use]
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            active_publications: self.active_publications.load(Ordering::Relaxed),
            active_paths: self.active_paths.load(Ordering::Relaxed),
            paths_opened: self.paths_opened.load(Ordering::Relaxed),
            paths_closed: self.paths_closed.load(Ordering::Relaxed),
            packets_forwarded: self.packets_forwarded.load(Ordering::Relaxed),
            bytes_forwarded: self.bytes_forwarded.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            packets_muted: self.packets_muted.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RelayStatsSnapshot {
    pub active_publications: u64,
    pub active_paths: u64,
    pub paths_opened: u64,
    pub paths_closed: u64,
    pub packets_forwarded: u64,
    pub bytes_forwarded: u64,
    pub packets_dropped: u64,
    /// Packets held back because the listener muted the publisher
    pub packets_muted: u64,
}

/// Selective forwarding engine
pub struct RelayEngine {
    config: RelayConfig,
    paths: DashMap<PathKey, PathHandle>,
    next_path_id: AtomicU64,
    stats: RelayStats,
}

impl RelayEngine {
    #[must_use]
    pub fn new(config: RelayConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            paths: DashMap::new(),
            next_path_id: AtomicU64::new(1),
            stats: RelayStats::default(),
        })
    }

    /// Start relaying `track` from `publisher` to every eligible listener.
    ///
    /// Listeners are evaluated once, now. Sessions that gain a peer later do
    /// not receive this track.
    pub async fn publish(
        self: &Arc<Self>,
        publisher: Arc<dyn Subscriber>,
        track: Arc<dyn InboundTrack>,
        listeners: Vec<Arc<dyn Subscriber>>,
    ) {
        let publisher_id = publisher.client_id().clone();
        let track_id = track.id();

        if track.kind() != TrackKind::Audio {
            debug!(publisher = %publisher_id, track_id = %track_id, "Ignoring non-audio track");
            return;
        }

        let publisher_token = publisher.lifetime();
        if publisher_token.is_cancelled() {
            return;
        }

        let (tx, _) = broadcast::channel(self.config.fanout_buffer_packets.max(1));
        let codec = track.codec();
        let mut opened = 0usize;

        for listener in listeners {
            let listener_id = listener.client_id().clone();
            if listener_id == publisher_id {
                continue;
            }
            let Some(peer) = listener.peer() else {
                debug!(listener = %listener_id, "Listener has no peer connection, skipping");
                continue;
            };
            if !listener.admits(&publisher_id) {
                debug!(publisher = %publisher_id, listener = %listener_id, "Listener does not admit publisher, skipping");
                continue;
            }

            let outbound = match peer.add_outbound_track(codec.clone(), &publisher_id).await {
                Ok(outbound) => outbound,
                Err(e) => {
                    warn!(
                        publisher = %publisher_id,
                        listener = %listener_id,
                        error = %e,
                        "Failed to attach outbound track"
                    );
                    continue;
                }
            };

            let key = PathKey {
                publisher: publisher_id.clone(),
                track: track_id.clone(),
                listener: listener_id,
            };
            self.open_path(
                key,
                tx.subscribe(),
                outbound,
                publisher_token.clone(),
                listener,
            );
            opened += 1;
        }

        info!(
            publisher = %publisher_id,
            track_id = %track_id,
            paths = opened,
            "Publication started"
        );

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine
                .read_publication(publisher_id, track_id, track, tx, publisher_token)
                .await;
        });
    }

    fn open_path(
        self: &Arc<Self>,
        key: PathKey,
        rx: broadcast::Receiver<Packet>,
        outbound: Arc<dyn OutboundTrack>,
        publisher_token: CancellationToken,
        listener: Arc<dyn Subscriber>,
    ) {
        let id = self.next_path_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let handle = PathHandle {
            id,
            cancel: cancel.clone(),
        };
        if let Some(previous) = self.paths.insert(key.clone(), handle) {
            previous.cancel.cancel();
        }

        self.stats.paths_opened.fetch_add(1, Ordering::Relaxed);
        self.stats.active_paths.fetch_add(1, Ordering::Relaxed);
        info!(
            path = %key,
            volume = listener.volume(&key.publisher),
            "Relay path opened"
        );

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine
                .forward(id, key, rx, outbound, publisher_token, listener, cancel)
                .await;
        });
    }

    async fn read_publication(
        &self,
        publisher: ClientId,
        track_id: TrackId,
        track: Arc<dyn InboundTrack>,
        tx: broadcast::Sender<Packet>,
        publisher_token: CancellationToken,
    ) {
        self.stats.active_publications.fetch_add(1, Ordering::Relaxed);
        loop {
            tokio::select! {
                () = publisher_token.cancelled() => break,
                result = track.read_rtp() => match result {
                    // No receivers is fine: every path may have ended already
                    Ok(packet) => { let _ = tx.send(packet); }
                    Err(e) => {
                        debug!(publisher = %publisher, track_id = %track_id, error = %e, "Inbound track read ended");
                        break;
                    }
                },
            }
        }
        self.stats.active_publications.fetch_sub(1, Ordering::Relaxed);
        info!(publisher = %publisher, track_id = %track_id, "Publication ended");
    }

    #[allow(clippy::too_many_arguments)]
    async fn forward(
        &self,
        id: u64,
        key: PathKey,
        mut rx: broadcast::Receiver<Packet>,
        outbound: Arc<dyn OutboundTrack>,
        publisher_token: CancellationToken,
        listener: Arc<dyn Subscriber>,
        cancel: CancellationToken,
    ) {
        let listener_token = listener.lifetime();
        let mut paused = false;
        let reason = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break "cancelled",
                () = publisher_token.cancelled() => break "publisher left",
                () = listener_token.cancelled() => break "listener left",
                result = rx.recv() => match result {
                    Ok(packet) => {
                        let admitted = listener.admits(&key.publisher);
                        if admitted == paused {
                            paused = !admitted;
                            debug!(path = %key, paused, "Listener preference changed");
                        }
                        if paused {
                            self.stats.packets_muted.fetch_add(1, Ordering::Relaxed);
                            continue;
                        }
                        if let Err(e) = outbound.write_rtp(&packet).await {
                            warn!(path = %key, error = %e, "Outbound write failed");
                            break "write failed";
                        }
                        self.stats.packets_forwarded.fetch_add(1, Ordering::Relaxed);
                        self.stats
                            .bytes_forwarded
                            .fetch_add(packet.payload.len() as u64, Ordering::Relaxed);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        self.stats.packets_dropped.fetch_add(skipped, Ordering::Relaxed);
                        debug!(path = %key, skipped, "Listener lagged, skipping packets");
                    }
                    Err(broadcast::error::RecvError::Closed) => break "publication ended",
                },
            }
        };

        self.paths.remove_if(&key, |_, handle| handle.id == id);
        if let Err(e) = outbound.detach().await {
            debug!(path = %key, error = %e, "Failed to detach outbound track");
        }
        self.stats.active_paths.fetch_sub(1, Ordering::Relaxed);
        self.stats.paths_closed.fetch_add(1, Ordering::Relaxed);
        info!(path = %key, reason, "Relay path closed");
    }

    /// Cancel one path. Returns false if it was not active.
    pub fn cancel_path(&self, key: &PathKey) -> bool {
        self.paths.get(key).is_some_and(|handle| {
            handle.cancel.cancel();
            true
        })
    }

    /// Cancel every path `client` publishes or listens on
    pub fn cancel_paths_for(&self, client: &ClientId) -> usize {
        let mut cancelled = 0;
        for entry in &self.paths {
            let key = entry.key();
            if &key.publisher == client || &key.listener == client {
                entry.value().cancel.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }

    #[must_use]
    pub fn has_path(&self, key: &PathKey) -> bool {
        self.paths.contains_key(key)
    }

    /// Paths currently registered (a cancelled path unregisters when its task exits)
    #[must_use]
    pub fn active_paths(&self) -> usize {
        self.paths.len()
    }

    #[must_use]
    pub fn stats(&self) -> RelayStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        audio_packet, eventually, listeners, FakeInboundTrack, FakePeer, FakeSubscriber,
    };

    fn key(publisher: &FakeSubscriber, track: &str, listener: &FakeSubscriber) -> PathKey {
        PathKey {
            publisher: publisher.client_id().clone(),
            track: TrackId::from(track),
            listener: listener.client_id().clone(),
        }
    }

    #[tokio::test]
    async fn test_forwards_to_every_eligible_listener() {
        let engine = RelayEngine::new(RelayConfig::default());
        let alice = FakeSubscriber::with_peer("alice");
        let bob = FakeSubscriber::with_peer("bob");
        let carol = FakeSubscriber::with_peer("carol");
        let (track, feed) = FakeInboundTrack::audio("mic");

        engine
            .publish(
                alice.clone(),
                track,
                listeners(&[&alice, &bob, &carol]),
            )
            .await;

        assert_eq!(engine.active_paths(), 2);
        assert!(!engine.has_path(&key(&alice, "mic", &alice)));

        for seq in 0..3 {
            feed.send(audio_packet(seq)).unwrap();
        }

        let bob_track = bob.fake_peer().outbound(0).unwrap();
        let carol_track = carol.fake_peer().outbound(0).unwrap();
        eventually(|| bob_track.written() == 3 && carol_track.written() == 3).await;
        assert!(alice.fake_peer().outbound(0).is_none());
    }

    #[tokio::test]
    async fn test_skips_listeners_without_peer_or_admission() {
        let engine = RelayEngine::new(RelayConfig::default());
        let alice = FakeSubscriber::with_peer("alice");
        let no_peer = FakeSubscriber::without_peer("dave");
        let muting = FakeSubscriber::with_peer("erin");
        muting.set_muted(alice.client_id(), true);
        let silent = FakeSubscriber::with_peer("frank");
        silent.set_volume(alice.client_id(), 0.0);
        let quiet = FakeSubscriber::with_peer("grace");
        quiet.set_volume(alice.client_id(), 0.5);
        let (track, _feed) = FakeInboundTrack::audio("mic");

        engine
            .publish(
                alice.clone(),
                track,
                listeners(&[&no_peer, &muting, &silent, &quiet]),
            )
            .await;

        assert_eq!(engine.active_paths(), 1);
        assert!(engine.has_path(&key(&alice, "mic", &quiet)));
        assert_eq!(muting.fake_peer().outbound_count(), 0);
        assert_eq!(silent.fake_peer().outbound_count(), 0);
    }

    #[tokio::test]
    async fn test_video_tracks_are_ignored() {
        let engine = RelayEngine::new(RelayConfig::default());
        let alice = FakeSubscriber::with_peer("alice");
        let bob = FakeSubscriber::with_peer("bob");
        let (track, _feed) = FakeInboundTrack::video("cam");

        engine.publish(alice, track, listeners(&[&bob])).await;

        assert_eq!(engine.active_paths(), 0);
        assert_eq!(bob.fake_peer().outbound_count(), 0);
    }

    #[tokio::test]
    async fn test_publisher_leaving_stops_all_paths() {
        let engine = RelayEngine::new(RelayConfig::default());
        let alice = FakeSubscriber::with_peer("alice");
        let bob = FakeSubscriber::with_peer("bob");
        let carol = FakeSubscriber::with_peer("carol");
        let (track, _feed) = FakeInboundTrack::audio("mic");

        engine
            .publish(alice.clone(), track, listeners(&[&bob, &carol]))
            .await;
        assert_eq!(engine.active_paths(), 2);

        alice.lifetime().cancel();

        eventually(|| engine.stats().paths_closed == 2).await;
        assert_eq!(engine.active_paths(), 0);
        assert!(bob.fake_peer().outbound(0).unwrap().is_detached());
        assert!(carol.fake_peer().outbound(0).unwrap().is_detached());
        eventually(|| engine.stats().active_publications == 0).await;
    }

    #[tokio::test]
    async fn test_listener_leaving_stops_only_its_path() {
        let engine = RelayEngine::new(RelayConfig::default());
        let alice = FakeSubscriber::with_peer("alice");
        let bob = FakeSubscriber::with_peer("bob");
        let carol = FakeSubscriber::with_peer("carol");
        let (track, feed) = FakeInboundTrack::audio("mic");

        engine
            .publish(alice.clone(), track, listeners(&[&bob, &carol]))
            .await;

        bob.lifetime().cancel();
        eventually(|| !engine.has_path(&key(&alice, "mic", &bob))).await;
        assert!(engine.has_path(&key(&alice, "mic", &carol)));

        feed.send(audio_packet(1)).unwrap();
        let carol_track = carol.fake_peer().outbound(0).unwrap();
        eventually(|| carol_track.written() == 1).await;
    }

    #[tokio::test]
    async fn test_mute_pauses_path_until_unmute() {
        let engine = RelayEngine::new(RelayConfig::default());
        let alice = FakeSubscriber::with_peer("alice");
        let bob = FakeSubscriber::with_peer("bob");
        let (track, feed) = FakeInboundTrack::audio("mic");

        engine.publish(alice.clone(), track, listeners(&[&bob])).await;
        let bob_track = bob.fake_peer().outbound(0).unwrap();

        feed.send(audio_packet(1)).unwrap();
        eventually(|| bob_track.written() == 1).await;

        bob.set_muted(alice.client_id(), true);
        feed.send(audio_packet(2)).unwrap();
        feed.send(audio_packet(3)).unwrap();

        // Let the forwarder consume both packets before unmuting
        eventually(|| engine.stats().packets_muted == 2).await;
        assert_eq!(bob_track.written(), 1);
        assert!(engine.has_path(&key(&alice, "mic", &bob)));
        assert!(!bob_track.is_detached());

        bob.set_muted(alice.client_id(), false);
        for seq in 4..11 {
            feed.send(audio_packet(seq)).unwrap();
        }

        eventually(|| bob_track.written() == 8).await;
        assert_eq!(engine.active_paths(), 1);
        assert_eq!(bob.fake_peer().outbound_count(), 1);
        assert!(!bob_track.is_detached());
    }

    #[tokio::test]
    async fn test_zero_volume_pauses_path_until_raised() {
        let engine = RelayEngine::new(RelayConfig::default());
        let alice = FakeSubscriber::with_peer("alice");
        let bob = FakeSubscriber::with_peer("bob");
        let (track, feed) = FakeInboundTrack::audio("mic");

        engine.publish(alice.clone(), track, listeners(&[&bob])).await;
        let bob_track = bob.fake_peer().outbound(0).unwrap();

        bob.set_volume(alice.client_id(), 0.0);
        feed.send(audio_packet(1)).unwrap();
        eventually(|| engine.stats().packets_muted == 1).await;
        assert_eq!(bob_track.written(), 0);

        bob.set_volume(alice.client_id(), 0.3);
        feed.send(audio_packet(2)).unwrap();
        eventually(|| bob_track.written() == 1).await;
        assert!(engine.has_path(&key(&alice, "mic", &bob)));
    }

    #[tokio::test]
    async fn test_write_failure_leaves_siblings_forwarding() {
        let engine = RelayEngine::new(RelayConfig::default());
        let alice = FakeSubscriber::with_peer("alice");
        let bob = FakeSubscriber::with_peer("bob");
        let carol = FakeSubscriber::with_peer("carol");
        let (track, feed) = FakeInboundTrack::audio("mic");

        engine
            .publish(alice.clone(), track, listeners(&[&bob, &carol]))
            .await;
        let bob_track = bob.fake_peer().outbound(0).unwrap();
        let carol_track = carol.fake_peer().outbound(0).unwrap();
        bob_track.fail_writes();

        for seq in 0..4 {
            feed.send(audio_packet(seq)).unwrap();
        }

        eventually(|| carol_track.written() == 4).await;
        eventually(|| !engine.has_path(&key(&alice, "mic", &bob))).await;
        assert!(engine.has_path(&key(&alice, "mic", &carol)));
        eventually(|| bob_track.is_detached()).await;
    }

    #[tokio::test]
    async fn test_attach_failure_is_skipped() {
        let engine = RelayEngine::new(RelayConfig::default());
        let alice = FakeSubscriber::with_peer("alice");
        let bob = FakeSubscriber::with_peer("bob");
        let carol = FakeSubscriber::with_peer("carol");
        bob.fake_peer().fail_attach();
        let (track, _feed) = FakeInboundTrack::audio("mic");

        engine
            .publish(alice.clone(), track, listeners(&[&bob, &carol]))
            .await;

        assert_eq!(engine.active_paths(), 1);
        assert!(engine.has_path(&key(&alice, "mic", &carol)));
    }

    #[tokio::test]
    async fn test_late_listener_gets_no_path() {
        let engine = RelayEngine::new(RelayConfig::default());
        let alice = FakeSubscriber::with_peer("alice");
        let late = FakeSubscriber::without_peer("late");
        let (track, feed) = FakeInboundTrack::audio("mic");

        engine.publish(alice.clone(), track, listeners(&[&late])).await;
        late.attach_peer(FakePeer::detached());
        feed.send(audio_packet(1)).unwrap();

        eventually(|| engine.stats().active_publications == 1).await;
        assert_eq!(engine.active_paths(), 0);
        assert_eq!(late.fake_peer().outbound_count(), 0);
    }

    #[tokio::test]
    async fn test_ended_publication_closes_paths() {
        let engine = RelayEngine::new(RelayConfig::default());
        let alice = FakeSubscriber::with_peer("alice");
        let bob = FakeSubscriber::with_peer("bob");
        let (track, feed) = FakeInboundTrack::audio("mic");

        engine.publish(alice.clone(), track, listeners(&[&bob])).await;
        drop(feed);

        eventually(|| engine.active_paths() == 0).await;
        assert_eq!(engine.stats().active_publications, 0);
    }

    #[tokio::test]
    async fn test_cancel_paths_for_client() {
        let engine = RelayEngine::new(RelayConfig::default());
        let alice = FakeSubscriber::with_peer("alice");
        let bob = FakeSubscriber::with_peer("bob");
        let carol = FakeSubscriber::with_peer("carol");
        let (alice_mic, _alice_feed) = FakeInboundTrack::audio("alice-mic");
        let (bob_mic, _bob_feed) = FakeInboundTrack::audio("bob-mic");

        engine
            .publish(alice.clone(), alice_mic, listeners(&[&bob, &carol]))
            .await;
        engine
            .publish(bob.clone(), bob_mic, listeners(&[&alice, &carol]))
            .await;
        assert_eq!(engine.active_paths(), 4);

        assert_eq!(engine.cancel_paths_for(bob.client_id()), 3);
        eventually(|| engine.active_paths() == 1).await;
        assert!(engine.has_path(&key(&alice, "alice-mic", &carol)));
    }

    #[tokio::test]
    async fn test_stats_count_forwarded_bytes() {
        let engine = RelayEngine::new(RelayConfig::default());
        let alice = FakeSubscriber::with_peer("alice");
        let bob = FakeSubscriber::with_peer("bob");
        let (track, feed) = FakeInboundTrack::audio("mic");

        engine.publish(alice.clone(), track, listeners(&[&bob])).await;
        feed.send(audio_packet(1)).unwrap();
        feed.send(audio_packet(2)).unwrap();

        eventually(|| engine.stats().packets_forwarded == 2).await;
        let stats = engine.stats();
        assert_eq!(stats.paths_opened, 1);
        assert_eq!(stats.active_paths, 1);
        assert_eq!(stats.bytes_forwarded, 2 * audio_packet(0).payload.len() as u64);
    }
}
