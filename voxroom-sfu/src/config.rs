//! Relay configuration

use serde::{Deserialize, Serialize};

/// Relay engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// STUN/TURN URLs handed to every peer connection
    pub ice_servers: Vec<String>,
    /// Packets buffered per publication before slow listeners start skipping
    pub fanout_buffer_packets: usize,
    /// Inclusive UDP port range for ICE host candidates (0 = OS ephemeral)
    pub udp_port_min: u16,
    pub udp_port_max: u16,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            fanout_buffer_packets: 256,
            udp_port_min: 0,
            udp_port_max: 0,
        }
    }
}
