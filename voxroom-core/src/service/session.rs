//! Client session state
//!
//! One [`Client`] per accepted WebSocket connection. The preference tables are
//! keyed by the client being listened to and guarded by a per-client lock that
//! is never held across an await.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;
use voxroom_sfu::{ClientId, MediaPeer, Subscriber};

use super::signaling::SignalingMessage;
use super::transport::SignalSink;
use crate::models::{RoomId, UserId};

/// Volume applied to clients with no explicit setting
pub const DEFAULT_VOLUME: f64 = 1.0;

/// Distinct clients one session may hold mute or volume settings for
pub const MAX_PREFERENCE_TARGETS: usize = 256;

#[derive(Default)]
struct Preferences {
    muted: HashMap<ClientId, bool>,
    volume: HashMap<ClientId, f64>,
}

impl Preferences {
    fn admits_target(&self, target: &ClientId) -> bool {
        if self.muted.contains_key(target) || self.volume.contains_key(target) {
            return true;
        }
        let distinct = self.muted.len()
            + self
                .volume
                .keys()
                .filter(|k| !self.muted.contains_key(*k))
                .count();
        distinct < MAX_PREFERENCE_TARGETS
    }
}

pub struct Client {
    id: ClientId,
    room_id: RoomId,
    user_id: UserId,
    preferences: Mutex<Preferences>,
    peer: RwLock<Option<Arc<dyn MediaPeer>>>,
    sink: Arc<dyn SignalSink>,
    token: CancellationToken,
    closed: AtomicBool,
    joined_at: Instant,
}

impl Client {
    #[must_use]
    pub fn new(id: ClientId, room_id: RoomId, user_id: UserId, sink: Arc<dyn SignalSink>) -> Arc<Self> {
        Arc::new(Self {
            id,
            room_id,
            user_id,
            preferences: Mutex::new(Preferences::default()),
            peer: RwLock::new(None),
            sink,
            token: CancellationToken::new(),
            closed: AtomicBool::new(false),
            joined_at: Instant::now(),
        })
    }

    #[must_use]
    pub const fn id(&self) -> &ClientId {
        &self.id
    }

    #[must_use]
    pub const fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Record whether `target` is muted. Returns false, leaving the table
    /// untouched, when muting a new target would exceed
    /// [`MAX_PREFERENCE_TARGETS`]; unmuting always succeeds.
    pub fn set_muted(&self, target: &ClientId, muted: bool) -> bool {
        {
            let mut prefs = self.preferences.lock();
            if muted {
                if !prefs.admits_target(target) {
                    return false;
                }
                prefs.muted.insert(target.clone(), true);
            } else {
                prefs.muted.remove(target);
            }
        }
        info!(client_id = %self.id, target = %target, muted, "Mute preference changed");
        true
    }

    /// Whether a mute or volume setting for `target` fits in the tables
    #[must_use]
    pub fn can_store_preference(&self, target: &ClientId) -> bool {
        self.preferences.lock().admits_target(target)
    }

    /// Drop every setting held for `target`, e.g. once it left the room
    pub fn forget(&self, target: &ClientId) {
        let mut prefs = self.preferences.lock();
        prefs.muted.remove(target);
        prefs.volume.remove(target);
    }

    #[must_use]
    pub fn muted(&self, target: &ClientId) -> bool {
        self.preferences.lock().muted.get(target).copied().unwrap_or(false)
    }

    /// Store `volume` for `target` if it is a finite value in `[0, 1]` and
    /// the table has room for it. Returns whether it was stored; rejected
    /// values leave the old setting.
    pub fn set_volume(&self, target: &ClientId, volume: f64) -> bool {
        if !volume.is_finite() || !(0.0..=1.0).contains(&volume) {
            return false;
        }
        {
            let mut prefs = self.preferences.lock();
            if !prefs.admits_target(target) {
                return false;
            }
            prefs.volume.insert(target.clone(), volume);
        }
        info!(client_id = %self.id, target = %target, volume, "Volume set");
        true
    }

    #[must_use]
    pub fn volume_for(&self, target: &ClientId) -> f64 {
        self.preferences
            .lock()
            .volume
            .get(target)
            .copied()
            .unwrap_or(DEFAULT_VOLUME)
    }

    #[must_use]
    pub fn media_peer(&self) -> Option<Arc<dyn MediaPeer>> {
        self.peer.read().clone()
    }

    pub fn set_media_peer(&self, peer: Arc<dyn MediaPeer>) {
        *self.peer.write() = Some(peer);
    }

    pub fn take_media_peer(&self) -> Option<Arc<dyn MediaPeer>> {
        self.peer.write().take()
    }

    /// Queue a message for this client
    pub fn send(&self, message: SignalingMessage) -> bool {
        self.sink.send(message)
    }

    /// Stop the outbound side once queued messages are flushed
    pub fn close_sink(&self) {
        self.sink.close();
    }

    /// Session token; cancelled when the session closes
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Mark the session closed. Only the first call returns true.
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn session_duration(&self) -> Duration {
        self.joined_at.elapsed()
    }
}

impl Subscriber for Client {
    fn client_id(&self) -> &ClientId {
        &self.id
    }

    fn peer(&self) -> Option<Arc<dyn MediaPeer>> {
        self.media_peer()
    }

    fn is_muted(&self, publisher: &ClientId) -> bool {
        self.muted(publisher)
    }

    fn volume(&self, publisher: &ClientId) -> f64 {
        self.volume_for(publisher)
    }

    fn lifetime(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("room_id", &self.room_id)
            .field("user_id", &self.user_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
