// identity of a relayed flow

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::packet::{Ipv4Packet, Protocol};

/// The device reaches the host's loopback through this address.
pub const HOST_LOOPBACK_ALIAS: Ipv4Addr = Ipv4Addr::new(10, 0, 2, 2);

/// Five-tuple of the device-side flow.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct ConnectionId {
    protocol: Protocol,
    source_ip: Ipv4Addr,
    source_port: u16,
    destination_ip: Ipv4Addr,
    destination_port: u16,
}

impl ConnectionId {
    pub fn new(
        protocol: Protocol,
        source: (Ipv4Addr, u16),
        destination: (Ipv4Addr, u16),
    ) -> Self {
        ConnectionId {
            protocol,
            source_ip: source.0,
            source_port: source.1,
            destination_ip: destination.0,
            destination_port: destination.1,
        }
    }

    /// `None` if the packet carries no supported transport header.
    pub fn from_packet(packet: &Ipv4Packet) -> Option<Self> {
        let transport = packet.transport_header()?;
        let ipv4 = packet.ipv4_header();
        Some(ConnectionId::new(
            transport.protocol(),
            (Ipv4Addr::from(ipv4.source()), transport.source_port()),
            (
                Ipv4Addr::from(ipv4.destination()),
                transport.destination_port(),
            ),
        ))
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn source(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.source_ip, self.source_port)
    }

    pub fn destination(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.destination_ip, self.destination_port)
    }

    /// Address to open on the host side.
    pub fn rewritten_destination(&self) -> SocketAddr {
        let ip = if self.destination_ip == HOST_LOOPBACK_ALIAS {
            Ipv4Addr::LOCALHOST
        } else {
            self.destination_ip
        };
        SocketAddr::V4(SocketAddrV4::new(ip, self.destination_port))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {}",
            self.protocol,
            self.source(),
            self.destination()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::PacketBuilder;
    use std::collections::HashSet;

    #[test]
    fn test_from_packet() {
        let mut raw = Vec::new();
        PacketBuilder::ipv4([10, 0, 2, 15], [10, 0, 2, 2], 64)
            .tcp(41000, 8080, 1, 1024)
            .syn()
            .write(&mut raw, &[])
            .unwrap();
        let packet = Ipv4Packet::parse(raw).unwrap();
        let id = ConnectionId::from_packet(&packet).unwrap();
        assert_eq!(id.protocol(), Protocol::Tcp);
        assert_eq!(id.source(), "10.0.2.15:41000".parse().unwrap());
        assert_eq!(id.destination(), "10.0.2.2:8080".parse().unwrap());
        assert_eq!(
            id.rewritten_destination(),
            "127.0.0.1:8080".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(id.to_string(), "TCP 10.0.2.15:41000 -> 10.0.2.2:8080");
    }

    #[test]
    fn test_other_destinations_untouched() {
        let id = ConnectionId::new(
            Protocol::Udp,
            (Ipv4Addr::new(10, 0, 2, 15), 5353),
            (Ipv4Addr::new(8, 8, 8, 8), 53),
        );
        assert_eq!(
            id.rewritten_destination(),
            "8.8.8.8:53".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(id.to_string(), "UDP 10.0.2.15:5353 -> 8.8.8.8:53");
    }

    #[test]
    fn test_hash_distinguishes_protocol() {
        let tcp = ConnectionId::new(
            Protocol::Tcp,
            (Ipv4Addr::new(10, 0, 2, 15), 1000),
            (Ipv4Addr::new(1, 1, 1, 1), 53),
        );
        let udp = ConnectionId::new(
            Protocol::Udp,
            (Ipv4Addr::new(10, 0, 2, 15), 1000),
            (Ipv4Addr::new(1, 1, 1, 1), 53),
        );
        let set: HashSet<_> = [tcp, udp, tcp].into_iter().collect();
        assert_eq!(set.len(), 2);
    }
}
