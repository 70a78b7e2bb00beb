// zero-copy views over a tcp header

use std::fmt;

use bitflags::bitflags;

use crate::error::{RelayError, Result};
use crate::packet::checksum;
use crate::packet::ipv4_header::{Ipv4Header, Protocol};

pub const MIN_TCP_HEADER_LENGTH: usize = 20;

const CHECKSUM_OFFSET: usize = 16;

bitflags! {
    pub struct TcpFlags: u16 {
        const FIN = 1 << 0;
        const SYN = 1 << 1;
        const RST = 1 << 2;
        const PSH = 1 << 3;
        const ACK = 1 << 4;
        const URG = 1 << 5;
    }
}

#[derive(Clone, Copy)]
pub struct TcpHeader<'a> {
    raw: &'a [u8],
}

impl<'a> TcpHeader<'a> {
    /// Parse the tcp header at the start of `raw` (the transport part of a packet).
    pub fn parse(raw: &'a [u8]) -> Result<Self> {
        if raw.len() < MIN_TCP_HEADER_LENGTH {
            return Err(RelayError::InvalidPacket(format!(
                "TCP header length must be at least 20 bytes (got {})",
                raw.len()
            )));
        }
        let header_length = usize::from(raw[12] >> 4) << 2;
        if header_length < MIN_TCP_HEADER_LENGTH || header_length > raw.len() {
            return Err(RelayError::InvalidPacket(format!(
                "Invalid TCP data offset: {} bytes",
                header_length
            )));
        }
        Ok(TcpHeader {
            raw: &raw[..header_length],
        })
    }

    pub(crate) fn new_unchecked(raw: &'a [u8]) -> Self {
        TcpHeader { raw }
    }

    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    pub fn source_port(&self) -> u16 {
        u16::from_be_bytes([self.raw[0], self.raw[1]])
    }

    pub fn destination_port(&self) -> u16 {
        u16::from_be_bytes([self.raw[2], self.raw[3]])
    }

    pub fn sequence_number(&self) -> u32 {
        u32::from_be_bytes([self.raw[4], self.raw[5], self.raw[6], self.raw[7]])
    }

    pub fn acknowledgement_number(&self) -> u32 {
        u32::from_be_bytes([self.raw[8], self.raw[9], self.raw[10], self.raw[11]])
    }

    pub fn header_length(&self) -> usize {
        usize::from(self.raw[12] >> 4) << 2
    }

    pub fn flags(&self) -> TcpFlags {
        TcpFlags::from_bits_truncate(u16::from_be_bytes([self.raw[12], self.raw[13]]) & 0x1ff)
    }

    pub fn window(&self) -> u16 {
        u16::from_be_bytes([self.raw[14], self.raw[15]])
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.raw[CHECKSUM_OFFSET], self.raw[CHECKSUM_OFFSET + 1]])
    }

    pub fn is_fin(&self) -> bool {
        self.flags().contains(TcpFlags::FIN)
    }

    pub fn is_syn(&self) -> bool {
        self.flags().contains(TcpFlags::SYN)
    }

    pub fn is_rst(&self) -> bool {
        self.flags().contains(TcpFlags::RST)
    }

    pub fn is_ack(&self) -> bool {
        self.flags().contains(TcpFlags::ACK)
    }
}

impl fmt::Debug for TcpHeader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpHeader")
            .field("source_port", &self.source_port())
            .field("destination_port", &self.destination_port())
            .field("seq", &self.sequence_number())
            .field("ack", &self.acknowledgement_number())
            .field("flags", &self.flags())
            .field("window", &self.window())
            .finish()
    }
}

pub struct TcpHeaderMut<'a> {
    raw: &'a mut [u8],
}

impl<'a> TcpHeaderMut<'a> {
    pub(crate) fn new_unchecked(raw: &'a mut [u8]) -> Self {
        TcpHeaderMut { raw }
    }

    pub fn view(&self) -> TcpHeader<'_> {
        TcpHeader::new_unchecked(self.raw)
    }

    pub fn swap_source_and_destination(&mut self) {
        let (source, destination) = self.raw[0..4].split_at_mut(2);
        source.swap_with_slice(destination);
    }

    pub fn set_sequence_number(&mut self, sequence_number: u32) {
        self.raw[4..8].copy_from_slice(&sequence_number.to_be_bytes());
    }

    pub fn set_acknowledgement_number(&mut self, acknowledgement_number: u32) {
        self.raw[8..12].copy_from_slice(&acknowledgement_number.to_be_bytes());
    }

    pub fn set_flags(&mut self, flags: TcpFlags) {
        let current = u16::from_be_bytes([self.raw[12], self.raw[13]]);
        let value = (current & 0xfe00) | (flags.bits() & 0x1ff);
        self.raw[12..14].copy_from_slice(&value.to_be_bytes());
    }

    pub fn set_window(&mut self, window: u16) {
        self.raw[14..16].copy_from_slice(&window.to_be_bytes());
    }

    /// Declare a bare 20-byte header; the caller keeps only those bytes.
    pub fn shrink_options(&mut self) {
        self.set_data_offset(5);
    }

    fn set_data_offset(&mut self, data_offset: u8) {
        self.raw[12] = (self.raw[12] & 0x0f) | (data_offset << 4);
    }

    /// Checksum over the pseudo-header, this header and `payload`.
    ///
    /// The header slice must hold exactly the header bytes.
    pub fn compute_checksum(&mut self, ipv4_header: &Ipv4Header<'_>, payload: &[u8]) {
        self.set_checksum(0);
        let segment_length = self.raw.len() + payload.len();
        let mut sum = pseudo_header_sum(ipv4_header, Protocol::Tcp, segment_length);
        sum = checksum::sum_words(sum, self.raw);
        sum = checksum::sum_words(sum, payload);
        self.set_checksum(checksum::finish(sum));
    }

    fn set_checksum(&mut self, checksum: u16) {
        self.raw[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&checksum.to_be_bytes());
    }
}

pub(crate) fn pseudo_header_sum(
    ipv4_header: &Ipv4Header<'_>,
    protocol: Protocol,
    segment_length: usize,
) -> u32 {
    let source = ipv4_header.source();
    let destination = ipv4_header.destination();
    (source >> 16)
        + (source & 0xffff)
        + (destination >> 16)
        + (destination & 0xffff)
        + u32::from(protocol.number())
        + segment_length as u32
}
