//! `webrtc` crate adapters for the media seam traits

use crate::config::RelayConfig;
use crate::peer::{MediaPeer, PeerConnector, PeerEventHandler};
use crate::track::{InboundTrack, OutboundTrack, TrackKind};
use crate::types::{ClientId, TrackId};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice::udp_network::{EphemeralUDP, UDPNetwork};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::track::track_remote::TrackRemote;

/// Creates real peer connections from a shared `webrtc` API instance
pub struct WebRtcConnector {
    api: API,
    ice_servers: Vec<String>,
}

impl WebRtcConnector {
    /// Build the media engine (default codecs and interceptors) once
    pub fn new(config: &RelayConfig) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .context("failed to register codecs")?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .context("failed to register interceptors")?;

        let mut setting_engine = SettingEngine::default();
        if config.udp_port_min > 0 && config.udp_port_max > 0 {
            let ephemeral = EphemeralUDP::new(config.udp_port_min, config.udp_port_max)
                .context("invalid UDP port range")?;
            setting_engine.set_udp_network(UDPNetwork::Ephemeral(ephemeral));
            info!(
                min = config.udp_port_min,
                max = config.udp_port_max,
                "WebRTC UDP port range configured"
            );
        }

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build();

        Ok(Self {
            api,
            ice_servers: config.ice_servers.clone(),
        })
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn create(&self, handler: Arc<dyn PeerEventHandler>) -> Result<Arc<dyn MediaPeer>> {
        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let pc = Arc::new(
            self.api
                .new_peer_connection(config)
                .await
                .context("failed to create peer connection")?,
        );

        let on_track_handler = Arc::clone(&handler);
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
            let handler = Arc::clone(&on_track_handler);
            Box::pin(async move {
                debug!(track_id = %track.id(), kind = %track.kind(), "Remote track received");
                handler.on_track(Arc::new(RtcInboundTrack { track })).await;
            })
        }));

        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                // None marks the end of gathering
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => handler.on_ice_candidate(init).await,
                    Err(e) => warn!(error = %e, "Failed to serialize local ICE candidate"),
                }
            })
        }));

        Ok(Arc::new(RtcPeer { pc }))
    }
}

/// A live `RTCPeerConnection`
pub struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl MediaPeer for RtcPeer {
    async fn apply_offer(&self, offer: RTCSessionDescription) -> Result<RTCSessionDescription> {
        let offer = RTCSessionDescription::offer(offer.sdp).context("invalid offer sdp")?;
        self.pc
            .set_remote_description(offer)
            .await
            .context("set_remote_description failed")?;
        let answer = self
            .pc
            .create_answer(None)
            .await
            .context("create_answer failed")?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .context("set_local_description failed")?;
        Ok(answer)
    }

    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        self.pc
            .add_ice_candidate(candidate)
            .await
            .context("add_ice_candidate failed")
    }

    async fn add_outbound_track(
        &self,
        codec: RTCRtpCodecCapability,
        publisher: &ClientId,
    ) -> Result<Arc<dyn OutboundTrack>> {
        let track = Arc::new(TrackLocalStaticRTP::new(
            codec,
            format!("audio-{publisher}-{}", nanoid::nanoid!(6)),
            publisher.to_string(),
        ));
        let sender = self
            .pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .context("add_track failed")?;
        Ok(Arc::new(RtcOutboundTrack {
            pc: Arc::clone(&self.pc),
            track,
            sender,
        }))
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await.context("close failed")
    }
}

struct RtcInboundTrack {
    track: Arc<TrackRemote>,
}

#[async_trait]
impl InboundTrack for RtcInboundTrack {
    fn id(&self) -> TrackId {
        TrackId::new(self.track.id())
    }

    fn kind(&self) -> TrackKind {
        TrackKind::from(self.track.kind())
    }

    fn codec(&self) -> RTCRtpCodecCapability {
        self.track.codec().capability
    }

    async fn read_rtp(&self) -> Result<Packet> {
        let (packet, _attributes) = self.track.read_rtp().await?;
        Ok(packet)
    }
}

struct RtcOutboundTrack {
    pc: Arc<RTCPeerConnection>,
    track: Arc<TrackLocalStaticRTP>,
    sender: Arc<RTCRtpSender>,
}

#[async_trait]
impl OutboundTrack for RtcOutboundTrack {
    async fn write_rtp(&self, packet: &Packet) -> Result<()> {
        self.track.write_rtp(packet).await?;
        Ok(())
    }

    async fn detach(&self) -> Result<()> {
        self.pc
            .remove_track(&self.sender)
            .await
            .context("remove_track failed")
    }
}
