//! Voxroom SFU (Selective Forwarding Unit)
//!
//! Audio relay for voice rooms. Every participant sends one peer connection's
//! worth of audio to the server; the relay forwards each inbound audio track
//! to the other participants that want to hear it, without decoding or mixing.
//!
//! ## Architecture
//!
//! - **`PeerConnector` / `MediaPeer`**: seam over the WebRTC engine. The
//!   production implementation is [`WebRtcConnector`], backed by `webrtc`.
//! - **`InboundTrack` / `OutboundTrack`**: RTP read and write ends of a relay path
//! - **`RelayEngine`**: one reader task per publication, one forwarding task
//!   per (publication, listener) pair, each with its own cancellation
//! - **`Subscriber`**: what the relay needs to know about a session (peer,
//!   mute and volume preferences, lifetime token)
//!
//! The crate knows nothing about rooms, users or signaling; callers decide who
//! the listeners of a publication are.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use voxroom_sfu::{RelayConfig, RelayEngine, WebRtcConnector};
//!
//! let config = RelayConfig::default();
//! let connector = WebRtcConnector::new(&config)?;
//! let relay = RelayEngine::new(config);
//!
//! // inside PeerEventHandler::on_track
//! relay.publish(publisher, track, listeners).await;
//! ```

mod config;
mod peer;
mod relay;
mod rtc;
mod track;
mod types;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::RelayConfig;
pub use peer::{MediaPeer, PeerConnector, PeerEventHandler};
pub use relay::{RelayEngine, RelayStats, RelayStatsSnapshot, Subscriber};
pub use rtc::{RtcPeer, WebRtcConnector};
pub use track::{InboundTrack, OutboundTrack, TrackKind};
pub use types::{ClientId, PathKey, TrackId};

// Re-exported so dependents can name session descriptions, candidates and packets
pub use webrtc;
