// an owned ipv4 packet with zero-copy header views

use std::fmt;

use tracing::{debug, enabled, trace, Level};

use crate::binary;
use crate::error::{RelayError, Result};
use crate::packet::ipv4_header::{Ipv4Header, Ipv4HeaderMut, Protocol};
use crate::packet::tcp_header::TcpHeader;
use crate::packet::transport_header::{TransportHeader, TransportHeaderMut};
use crate::packet::udp_header::UdpHeader;

/// Packet length is stored on 16 bits.
pub const MAX_PACKET_LENGTH: usize = 1 << 16;

pub struct Ipv4Packet {
    raw: Vec<u8>,
    ipv4_header_length: usize,
    // protocol and transport header length, None if the packet is not relayable
    transport: Option<(Protocol, usize)>,
}

impl Ipv4Packet {
    /// Parse a packet. `raw` is truncated to the declared total length.
    ///
    /// Fails only if the IPv4 header itself is unusable; an unsupported
    /// protocol or a truncated transport header yields a packet that is not
    /// [`is_valid`](Self::is_valid).
    pub fn parse(mut raw: Vec<u8>) -> Result<Self> {
        if enabled!(Level::TRACE) {
            trace!("IPv4Packet: {}", binary::build_packet_string(&raw));
        }

        let header = Ipv4Header::parse(&raw)?;
        let ipv4_header_length = header.header_length();
        let total_length = usize::from(header.total_length());
        if total_length < ipv4_header_length || total_length > raw.len() {
            return Err(RelayError::InvalidPacket(format!(
                "Invalid total length {} (header {}, buffer {})",
                total_length,
                ipv4_header_length,
                raw.len()
            )));
        }
        let supported = header.is_supported();
        let protocol = header.protocol();
        raw.truncate(total_length);

        let transport = if supported {
            let transport_raw = &raw[ipv4_header_length..];
            let parsed = match protocol {
                Protocol::Tcp => TcpHeader::parse(transport_raw).map(|h| h.header_length()),
                _ => UdpHeader::parse(transport_raw).map(|h| h.header_length()),
            };
            match parsed {
                Ok(length) => Some((protocol, length)),
                Err(err) => {
                    debug!("Malformed transport header: {}", err);
                    None
                }
            }
        } else {
            debug!("Unsupported IPv4 headers");
            None
        };

        Ok(Ipv4Packet {
            raw,
            ipv4_header_length,
            transport,
        })
    }

    /// Build a packet whose header lengths are already known to be consistent.
    pub(crate) fn from_parts(
        raw: Vec<u8>,
        ipv4_header_length: usize,
        protocol: Protocol,
        transport_header_length: usize,
    ) -> Self {
        Ipv4Packet {
            raw,
            ipv4_header_length,
            transport: Some((protocol, transport_header_length)),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.transport.is_some()
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn length(&self) -> usize {
        self.raw.len()
    }

    pub fn ipv4_header(&self) -> Ipv4Header<'_> {
        Ipv4Header::new_unchecked(&self.raw[..self.ipv4_header_length])
    }

    pub fn ipv4_header_mut(&mut self) -> Ipv4HeaderMut<'_> {
        Ipv4HeaderMut::new_unchecked(&mut self.raw[..self.ipv4_header_length])
    }

    pub fn transport_header(&self) -> Option<TransportHeader<'_>> {
        let (protocol, length) = self.transport?;
        let start = self.ipv4_header_length;
        TransportHeader::new_unchecked(protocol, &self.raw[start..start + length])
    }

    pub fn transport_header_mut(&mut self) -> Option<TransportHeaderMut<'_>> {
        let (protocol, length) = self.transport?;
        let start = self.ipv4_header_length;
        TransportHeaderMut::new_unchecked(protocol, &mut self.raw[start..start + length])
    }

    pub fn tcp_header(&self) -> Option<TcpHeader<'_>> {
        match self.transport_header()? {
            TransportHeader::Tcp(header) => Some(header),
            TransportHeader::Udp(_) => None,
        }
    }

    fn headers_length(&self) -> usize {
        self.ipv4_header_length + self.transport.map_or(0, |(_, length)| length)
    }

    /// Transport payload, empty for an invalid packet.
    pub fn payload(&self) -> &[u8] {
        if !self.is_valid() {
            return &[];
        }
        &self.raw[self.headers_length()..]
    }

    pub fn payload_length(&self) -> usize {
        self.payload().len()
    }

    pub fn swap_source_and_destination(&mut self) {
        self.ipv4_header_mut().swap_source_and_destination();
        if let Some(mut transport) = self.transport_header_mut() {
            transport.swap_source_and_destination();
        }
    }

    pub fn compute_checksums(&mut self) {
        let (ip, rest) = self.raw.split_at_mut(self.ipv4_header_length);
        Ipv4HeaderMut::new_unchecked(ip).compute_checksum();
        if let Some((protocol, length)) = self.transport {
            let (transport, payload) = rest.split_at_mut(length);
            if let Some(mut header) = TransportHeaderMut::new_unchecked(protocol, transport) {
                header.compute_checksum(&Ipv4Header::new_unchecked(ip), payload);
            }
        }
    }
}

impl fmt::Debug for Ipv4Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ipv4Packet")
            .field("ipv4", &self.ipv4_header())
            .field("transport", &self.transport_header())
            .field("payload_length", &self.payload_length())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::checksum;
    use etherparse::PacketBuilder;

    fn udp_packet(payload: &[u8]) -> Vec<u8> {
        let builder = PacketBuilder::ipv4([10, 0, 2, 15], [8, 8, 8, 8], 64).udp(5353, 53);
        let mut raw = Vec::new();
        builder.write(&mut raw, payload).unwrap();
        raw
    }

    #[test]
    fn test_parse_udp() {
        let packet = Ipv4Packet::parse(udp_packet(b"query")).unwrap();
        assert!(packet.is_valid());
        assert_eq!(packet.length(), 20 + 8 + 5);
        assert_eq!(packet.payload(), b"query");
        match packet.transport_header() {
            Some(TransportHeader::Udp(header)) => {
                assert_eq!(header.source_port(), 5353);
                assert_eq!(header.destination_port(), 53);
            }
            other => panic!("unexpected transport header {:?}", other),
        }
    }

    #[test]
    fn test_parse_truncates_to_total_length() {
        let mut raw = udp_packet(b"abc");
        raw.extend_from_slice(&[0xff; 10]);
        let packet = Ipv4Packet::parse(raw).unwrap();
        assert_eq!(packet.length(), 31);
        assert_eq!(packet.payload(), b"abc");
    }

    #[test]
    fn test_parse_rejects_short_buffer() {
        let raw = udp_packet(b"abcdef");
        assert!(Ipv4Packet::parse(raw[..30].to_vec()).is_err());
    }

    #[test]
    fn test_unsupported_protocol_is_invalid() {
        let mut raw = udp_packet(b"ping");
        raw[9] = 1; // icmp
        let packet = Ipv4Packet::parse(raw).unwrap();
        assert!(!packet.is_valid());
        assert!(packet.transport_header().is_none());
        assert!(packet.payload().is_empty());
    }

    #[test]
    fn test_ipv6_is_invalid() {
        let mut raw = udp_packet(b"ping");
        raw[0] = 0x65;
        let packet = Ipv4Packet::parse(raw).unwrap();
        assert!(!packet.is_valid());
    }

    #[test]
    fn test_truncated_tcp_header_is_invalid() {
        let mut raw = udp_packet(&[0u8; 4]);
        raw[9] = 6; // claims tcp but only 12 transport bytes
        let packet = Ipv4Packet::parse(raw).unwrap();
        assert!(!packet.is_valid());
    }

    #[test]
    fn test_swap_and_compute_checksums() {
        let builder = PacketBuilder::ipv4([10, 0, 2, 16], [93, 184, 216, 34], 64)
            .tcp(40000, 80, 1000, 8192)
            .ack(5);
        let mut raw = Vec::new();
        builder.write(&mut raw, b"GET / HTTP/1.0\r\n\r\n").unwrap();
        let mut packet = Ipv4Packet::parse(raw).unwrap();

        packet.swap_source_and_destination();
        packet.compute_checksums();

        let ip = etherparse::Ipv4HeaderSlice::from_slice(packet.raw()).unwrap();
        assert_eq!(ip.source(), [93, 184, 216, 34]);
        assert_eq!(ip.destination(), [10, 0, 2, 16]);
        assert!(packet.ipv4_header().is_checksum_valid());

        let tcp = etherparse::TcpHeaderSlice::from_slice(&packet.raw()[20..]).unwrap();
        assert_eq!(tcp.source_port(), 80);
        assert_eq!(tcp.destination_port(), 40000);
        let expected = tcp
            .to_header()
            .calc_checksum_ipv4(&ip.to_header(), packet.payload())
            .unwrap();
        assert_eq!(tcp.checksum(), expected);

        let header = packet.tcp_header().unwrap();
        let segment_length = packet.length() - 20;
        let mut sum = crate::packet::tcp_header::pseudo_header_sum(
            &packet.ipv4_header(),
            Protocol::Tcp,
            segment_length,
        );
        sum = checksum::sum_words(sum, header.raw());
        sum = checksum::sum_words(sum, packet.payload());
        assert!(checksum::verify(sum));
    }
}
