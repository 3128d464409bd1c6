//! Media track seam
//!
//! The relay never touches `webrtc` track types directly. It talks to
//! [`InboundTrack`] (publisher side) and [`OutboundTrack`] (listener side), so
//! forwarding policy can be driven by in-memory tracks in tests and by the
//! `webrtc` adapter in production.

use crate::types::TrackId;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};

/// Media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl From<RTPCodecType> for TrackKind {
    fn from(codec_type: RTPCodecType) -> Self {
        match codec_type {
            RTPCodecType::Audio => Self::Audio,
            _ => Self::Video,
        }
    }
}

impl From<&str> for TrackKind {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "audio" => Self::Audio,
            _ => Self::Video,
        }
    }
}

/// A track received from a publisher's peer connection
#[async_trait]
pub trait InboundTrack: Send + Sync {
    fn id(&self) -> TrackId;

    fn kind(&self) -> TrackKind;

    /// Codec the publisher negotiated; outbound tracks reuse it verbatim
    fn codec(&self) -> RTCRtpCodecCapability;

    /// Read the next RTP packet. Blocks until one arrives; an error means
    /// the publication is over.
    async fn read_rtp(&self) -> Result<Packet>;
}

/// A track attached to a listener's peer connection
#[async_trait]
pub trait OutboundTrack: Send + Sync {
    async fn write_rtp(&self, packet: &Packet) -> Result<()>;

    /// Remove the track from the listener's peer connection
    async fn detach(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_kind_from_codec_type() {
        assert_eq!(TrackKind::from(RTPCodecType::Audio), TrackKind::Audio);
        assert_eq!(TrackKind::from(RTPCodecType::Video), TrackKind::Video);
        assert_eq!(TrackKind::from(RTPCodecType::Unspecified), TrackKind::Video);
    }

    #[test]
    fn test_track_kind_from_str() {
        assert_eq!(TrackKind::from("AUDIO"), TrackKind::Audio);
        assert_eq!(TrackKind::from("video"), TrackKind::Video);
    }
}
