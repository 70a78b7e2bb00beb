// runtime settings of the relay

use std::path::PathBuf;
use std::time::Duration;

use crate::packet::MAX_PACKET_LENGTH;

pub const DEFAULT_PORT: u16 = 31416;
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
pub const UDP_IDLE_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// Client-side buffer towards the device.
pub const CLIENT_BUFFER_SIZE: usize = 16 * MAX_PACKET_LENGTH;
/// Per-connection buffer towards the network.
pub const CONNECTION_BUFFER_SIZE: usize = 4 * MAX_PACKET_LENGTH;

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub port: u16,
    pub cleanup_interval: Duration,
    pub udp_idle_timeout: Duration,
    /// Write every tunnelled packet to this pcap file.
    pub capture: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            port: DEFAULT_PORT,
            cleanup_interval: CLEANUP_INTERVAL,
            udp_idle_timeout: UDP_IDLE_TIMEOUT,
            capture: None,
        }
    }
}

impl RelayConfig {
    pub fn with_port(port: u16) -> Self {
        RelayConfig {
            port,
            ..Default::default()
        }
    }
}
