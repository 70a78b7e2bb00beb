// builds response packets from a pinned header template

use crate::error::{RelayError, Result};
use crate::packet::tcp_header::MIN_TCP_HEADER_LENGTH;
use crate::packet::{
    Ipv4HeaderMut, Ipv4Packet, Protocol, TcpHeaderMut, TransportHeader, TransportHeaderMut,
    MAX_PACKET_LENGTH,
};

/// Serializes payloads behind a copy of the headers of the packet that opened
/// the connection, with source and destination swapped.
///
/// The headers live at the start of a packet-sized buffer and the payload is
/// written right after them, so a response only costs one final copy.
pub struct Packetizer {
    buffer: Box<[u8]>,
    ipv4_header_length: usize,
    transport_header_length: usize,
    protocol: Protocol,
}

impl Packetizer {
    pub fn new(reference: &Ipv4Packet) -> Result<Self> {
        let transport = reference
            .transport_header()
            .ok_or_else(|| RelayError::InvalidPacket("no transport header".into()))?;
        let protocol = transport.protocol();
        let ipv4_raw = reference.ipv4_header().raw();
        let ipv4_header_length = ipv4_raw.len();
        let transport_raw = match transport {
            // no tcp options are ever emitted
            TransportHeader::Tcp(h) => &h.raw()[..MIN_TCP_HEADER_LENGTH],
            TransportHeader::Udp(h) => h.raw(),
        };
        let transport_header_length = transport_raw.len();

        let mut buffer = vec![0; MAX_PACKET_LENGTH].into_boxed_slice();
        buffer[..ipv4_header_length].copy_from_slice(ipv4_raw);
        buffer[ipv4_header_length..ipv4_header_length + transport_header_length]
            .copy_from_slice(transport_raw);

        let mut packetizer = Packetizer {
            buffer,
            ipv4_header_length,
            transport_header_length,
            protocol,
        };
        packetizer.response_ipv4_header_mut().swap_source_and_destination();
        if let Some(mut tcp) = packetizer.response_tcp_header_mut() {
            tcp.shrink_options();
        }
        if let Some(mut transport) = packetizer.response_transport_header_mut() {
            transport.swap_source_and_destination();
        }
        Ok(packetizer)
    }

    pub fn headers_length(&self) -> usize {
        self.ipv4_header_length + self.transport_header_length
    }

    /// Largest payload that keeps the total length on 16 bits.
    pub fn max_payload_length(&self) -> usize {
        (MAX_PACKET_LENGTH - 1) - self.headers_length()
    }

    pub fn response_ipv4_header_mut(&mut self) -> Ipv4HeaderMut<'_> {
        Ipv4HeaderMut::new_unchecked(&mut self.buffer[..self.ipv4_header_length])
    }

    pub fn response_transport_header_mut(&mut self) -> Option<TransportHeaderMut<'_>> {
        let start = self.ipv4_header_length;
        let end = self.headers_length();
        TransportHeaderMut::new_unchecked(self.protocol, &mut self.buffer[start..end])
    }

    pub fn response_tcp_header_mut(&mut self) -> Option<TcpHeaderMut<'_>> {
        match self.response_transport_header_mut()? {
            TransportHeaderMut::Tcp(header) => Some(header),
            TransportHeaderMut::Udp(_) => None,
        }
    }

    /// Payload area, limited to `max_length` bytes, for reading straight from a socket.
    pub fn payload_buffer(&mut self, max_length: usize) -> &mut [u8] {
        let start = self.headers_length();
        let length = max_length.min(self.max_payload_length());
        &mut self.buffer[start..start + length]
    }

    /// Finalize a packet for the `payload_length` bytes already in the payload area.
    pub fn inflate(&mut self, payload_length: usize) -> Ipv4Packet {
        let payload_length = payload_length.min(self.max_payload_length());
        let total_length = self.headers_length() + payload_length;

        self.response_ipv4_header_mut()
            .set_total_length(total_length as u16);
        if let Some(mut transport) = self.response_transport_header_mut() {
            transport.set_payload_length(payload_length as u16);
        }

        let mut packet = Ipv4Packet::from_parts(
            self.buffer[..total_length].to_vec(),
            self.ipv4_header_length,
            self.protocol,
            self.transport_header_length,
        );
        packet.compute_checksums();
        packet
    }

    pub fn packetize(&mut self, payload: &[u8]) -> Ipv4Packet {
        let area = self.payload_buffer(payload.len());
        let length = area.len();
        area.copy_from_slice(&payload[..length]);
        self.inflate(length)
    }

    pub fn packetize_empty_payload(&mut self) -> Ipv4Packet {
        self.inflate(0)
    }
}
