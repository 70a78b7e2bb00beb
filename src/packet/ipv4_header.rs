// zero-copy views over an ipv4 header stored at the start of a packet buffer

use std::fmt;
use std::net::Ipv4Addr;

use crate::error::{RelayError, Result};
use crate::packet::checksum;

pub const MIN_IPV4_HEADER_LENGTH: usize = 20;

const CHECKSUM_OFFSET: usize = 10;

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Protocol {
    Tcp,
    Udp,
    Other(u8),
}

impl Protocol {
    pub fn from_number(number: u8) -> Self {
        match number {
            6 => Protocol::Tcp,
            17 => Protocol::Udp,
            n => Protocol::Other(n),
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Protocol::Tcp => 6,
            Protocol::Udp => 17,
            Protocol::Other(n) => n,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
            Protocol::Other(n) => write!(f, "proto({})", n),
        }
    }
}

/// Version stored in the first 4 bits, `None` on an empty buffer.
pub fn read_version(buffer: &[u8]) -> Option<u8> {
    buffer.first().map(|b| b >> 4)
}

/// Total length field (offset 2), `None` if the buffer does not contain it yet.
pub fn read_length(buffer: &[u8]) -> Option<u16> {
    if buffer.len() < 4 {
        return None;
    }
    Some(u16::from_be_bytes([buffer[2], buffer[3]]))
}

#[derive(Clone, Copy)]
pub struct Ipv4Header<'a> {
    raw: &'a [u8],
}

impl<'a> Ipv4Header<'a> {
    /// Parse the header at the start of `raw`; the view is limited to the header bytes.
    pub fn parse(raw: &'a [u8]) -> Result<Self> {
        if raw.len() < MIN_IPV4_HEADER_LENGTH {
            return Err(RelayError::InvalidPacket(format!(
                "IPv4 header length must be at least 20 bytes (got {})",
                raw.len()
            )));
        }
        let header_length = usize::from(raw[0] & 0xf) << 2;
        if header_length < MIN_IPV4_HEADER_LENGTH || header_length > raw.len() {
            return Err(RelayError::InvalidPacket(format!(
                "Invalid IPv4 header length: {}",
                header_length
            )));
        }
        Ok(Ipv4Header {
            raw: &raw[..header_length],
        })
    }

    pub(crate) fn new_unchecked(raw: &'a [u8]) -> Self {
        Ipv4Header { raw }
    }

    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    pub fn version(&self) -> u8 {
        self.raw[0] >> 4
    }

    pub fn header_length(&self) -> usize {
        usize::from(self.raw[0] & 0xf) << 2
    }

    pub fn total_length(&self) -> u16 {
        u16::from_be_bytes([self.raw[2], self.raw[3]])
    }

    pub fn protocol(&self) -> Protocol {
        Protocol::from_number(self.raw[9])
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.raw[CHECKSUM_OFFSET], self.raw[CHECKSUM_OFFSET + 1]])
    }

    pub fn source(&self) -> u32 {
        u32::from_be_bytes([self.raw[12], self.raw[13], self.raw[14], self.raw[15]])
    }

    pub fn destination(&self) -> u32 {
        u32::from_be_bytes([self.raw[16], self.raw[17], self.raw[18], self.raw[19]])
    }

    pub fn is_supported(&self) -> bool {
        self.version() == 4 && !matches!(self.protocol(), Protocol::Other(_))
    }

    /// Check the stored checksum against the header content.
    pub fn is_checksum_valid(&self) -> bool {
        checksum::verify(checksum::sum_words(0, self.raw))
    }
}

impl fmt::Debug for Ipv4Header<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ipv4Header")
            .field("version", &self.version())
            .field("header_length", &self.header_length())
            .field("total_length", &self.total_length())
            .field("protocol", &self.protocol())
            .field("source", &Ipv4Addr::from(self.source()))
            .field("destination", &Ipv4Addr::from(self.destination()))
            .finish()
    }
}

pub struct Ipv4HeaderMut<'a> {
    raw: &'a mut [u8],
}

impl<'a> Ipv4HeaderMut<'a> {
    /// `raw` must be exactly the header bytes of an already validated header.
    pub(crate) fn new_unchecked(raw: &'a mut [u8]) -> Self {
        Ipv4HeaderMut { raw }
    }

    pub fn view(&self) -> Ipv4Header<'_> {
        Ipv4Header::new_unchecked(self.raw)
    }

    pub fn set_total_length(&mut self, total_length: u16) {
        self.raw[2..4].copy_from_slice(&total_length.to_be_bytes());
    }

    pub fn set_source(&mut self, source: u32) {
        self.raw[12..16].copy_from_slice(&source.to_be_bytes());
    }

    pub fn set_destination(&mut self, destination: u32) {
        self.raw[16..20].copy_from_slice(&destination.to_be_bytes());
    }

    pub fn swap_source_and_destination(&mut self) {
        let (source, destination) = self.raw[12..20].split_at_mut(4);
        source.swap_with_slice(destination);
    }

    pub fn compute_checksum(&mut self) {
        self.set_checksum(0);
        let sum = checksum::sum_words(0, self.raw);
        self.set_checksum(checksum::finish(sum));
    }

    fn set_checksum(&mut self, checksum: u16) {
        self.raw[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&checksum.to_be_bytes());
    }
}
