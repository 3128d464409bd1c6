//! Signaling wire format
//!
//! One flat JSON envelope for every message in both directions. `type` picks
//! the kind; each kind fills only the fields it needs, and absent fields are
//! omitted rather than sent as defaults.

use serde::{Deserialize, Serialize};
use voxroom_sfu::webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use voxroom_sfu::webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use voxroom_sfu::ClientId;

/// Message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    // client -> server
    Join,
    Offer,
    /// Both directions: client candidates inbound, server candidates outbound
    Candidate,
    Mute,
    Unmute,
    SetVolume,
    GetParticipants,
    CreateRoom,

    // server -> client
    Participants,
    Answer,
    MuteAck,
    UnmuteAck,
    VolumeAck,
    RoomCreated,
    Error,

    /// Any `type` this server does not know
    #[serde(other)]
    Unknown,
}

impl MessageKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Offer => "offer",
            Self::Candidate => "candidate",
            Self::Mute => "mute",
            Self::Unmute => "unmute",
            Self::SetVolume => "set_volume",
            Self::GetParticipants => "get_participants",
            Self::CreateRoom => "create_room",
            Self::Participants => "participants",
            Self::Answer => "answer",
            Self::MuteAck => "mute_ack",
            Self::UnmuteAck => "unmute_ack",
            Self::VolumeAck => "volume_ack",
            Self::RoomCreated => "room_created",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signaling envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalingMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_client_id: Option<ClientId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<RTCSessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<RTCIceCandidateInit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participants: Option<Vec<ClientId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Display name, `create_room` only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl SignalingMessage {
    /// Envelope of `kind` with every payload field absent
    #[must_use]
    pub const fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            room_id: None,
            client_id: None,
            target_client_id: None,
            sdp: None,
            candidate: None,
            volume: None,
            participants: None,
            message: None,
            name: None,
        }
    }

    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::new(MessageKind::Error)
        }
    }

    /// Join response: the caller's assigned ID plus everyone in the room
    #[must_use]
    pub fn joined(client_id: ClientId, participants: Vec<ClientId>) -> Self {
        Self {
            client_id: Some(client_id),
            participants: Some(participants),
            ..Self::new(MessageKind::Participants)
        }
    }

    #[must_use]
    pub fn participants(participants: Vec<ClientId>) -> Self {
        Self {
            participants: Some(participants),
            ..Self::new(MessageKind::Participants)
        }
    }

    #[must_use]
    pub fn answer(sdp: RTCSessionDescription) -> Self {
        Self {
            sdp: Some(sdp),
            ..Self::new(MessageKind::Answer)
        }
    }

    #[must_use]
    pub fn candidate(candidate: RTCIceCandidateInit) -> Self {
        Self {
            candidate: Some(candidate),
            ..Self::new(MessageKind::Candidate)
        }
    }

    /// `mute_ack` / `unmute_ack`
    #[must_use]
    pub fn ack(kind: MessageKind, target: ClientId) -> Self {
        Self {
            target_client_id: Some(target),
            ..Self::new(kind)
        }
    }

    /// `volume_ack` carrying the volume now in effect for `target`
    #[must_use]
    pub fn volume_ack(target: ClientId, volume: f64) -> Self {
        Self {
            target_client_id: Some(target),
            volume: Some(volume),
            ..Self::new(MessageKind::VolumeAck)
        }
    }

    #[must_use]
    pub fn room_created(room_id: String, message: impl Into<String>) -> Self {
        Self {
            room_id: Some(room_id),
            message: Some(message.into()),
            ..Self::new(MessageKind::RoomCreated)
        }
    }

    #[must_use]
    pub fn join(room_id: impl Into<String>) -> Self {
        Self {
            room_id: Some(room_id.into()),
            ..Self::new(MessageKind::Join)
        }
    }

    #[must_use]
    pub fn offer(sdp: RTCSessionDescription) -> Self {
        Self {
            sdp: Some(sdp),
            ..Self::new(MessageKind::Offer)
        }
    }

    /// `mute` / `unmute` request
    #[must_use]
    pub fn targeting(kind: MessageKind, target: ClientId) -> Self {
        Self {
            target_client_id: Some(target),
            ..Self::new(kind)
        }
    }

    #[must_use]
    pub fn set_volume(target: ClientId, volume: f64) -> Self {
        Self {
            target_client_id: Some(target),
            volume: Some(volume),
            ..Self::new(MessageKind::SetVolume)
        }
    }
}
