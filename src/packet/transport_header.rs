// transport header variants carried by a supported ipv4 packet

use crate::packet::ipv4_header::{Ipv4Header, Protocol};
use crate::packet::tcp_header::{TcpHeader, TcpHeaderMut};
use crate::packet::udp_header::{UdpHeader, UdpHeaderMut};

#[derive(Clone, Copy, Debug)]
pub enum TransportHeader<'a> {
    Tcp(TcpHeader<'a>),
    Udp(UdpHeader<'a>),
}

impl<'a> TransportHeader<'a> {
    pub(crate) fn new_unchecked(protocol: Protocol, raw: &'a [u8]) -> Option<Self> {
        match protocol {
            Protocol::Tcp => Some(TransportHeader::Tcp(TcpHeader::new_unchecked(raw))),
            Protocol::Udp => Some(TransportHeader::Udp(UdpHeader::new_unchecked(raw))),
            Protocol::Other(_) => None,
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            TransportHeader::Tcp(_) => Protocol::Tcp,
            TransportHeader::Udp(_) => Protocol::Udp,
        }
    }

    pub fn source_port(&self) -> u16 {
        match self {
            TransportHeader::Tcp(h) => h.source_port(),
            TransportHeader::Udp(h) => h.source_port(),
        }
    }

    pub fn destination_port(&self) -> u16 {
        match self {
            TransportHeader::Tcp(h) => h.destination_port(),
            TransportHeader::Udp(h) => h.destination_port(),
        }
    }

    pub fn header_length(&self) -> usize {
        match self {
            TransportHeader::Tcp(h) => h.header_length(),
            TransportHeader::Udp(h) => h.header_length(),
        }
    }
}

pub enum TransportHeaderMut<'a> {
    Tcp(TcpHeaderMut<'a>),
    Udp(UdpHeaderMut<'a>),
}

impl<'a> TransportHeaderMut<'a> {
    pub(crate) fn new_unchecked(protocol: Protocol, raw: &'a mut [u8]) -> Option<Self> {
        match protocol {
            Protocol::Tcp => Some(TransportHeaderMut::Tcp(TcpHeaderMut::new_unchecked(raw))),
            Protocol::Udp => Some(TransportHeaderMut::Udp(UdpHeaderMut::new_unchecked(raw))),
            Protocol::Other(_) => None,
        }
    }

    pub fn swap_source_and_destination(&mut self) {
        match self {
            TransportHeaderMut::Tcp(h) => h.swap_source_and_destination(),
            TransportHeaderMut::Udp(h) => h.swap_source_and_destination(),
        }
    }

    /// TCP carries no length field, only UDP is updated.
    pub fn set_payload_length(&mut self, payload_length: u16) {
        if let TransportHeaderMut::Udp(h) = self {
            h.set_payload_length(payload_length);
        }
    }

    pub fn compute_checksum(&mut self, ipv4_header: &Ipv4Header<'_>, payload: &[u8]) {
        match self {
            TransportHeaderMut::Tcp(h) => h.compute_checksum(ipv4_header, payload),
            TransportHeaderMut::Udp(h) => h.compute_checksum(),
        }
    }
}
