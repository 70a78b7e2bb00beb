// zero-copy views over a udp header

use std::fmt;

use crate::error::{RelayError, Result};

pub const UDP_HEADER_LENGTH: usize = 8;

#[derive(Clone, Copy)]
pub struct UdpHeader<'a> {
    raw: &'a [u8],
}

impl<'a> UdpHeader<'a> {
    pub fn parse(raw: &'a [u8]) -> Result<Self> {
        if raw.len() < UDP_HEADER_LENGTH {
            return Err(RelayError::InvalidPacket(format!(
                "UDP header length must be 8 bytes (got {})",
                raw.len()
            )));
        }
        Ok(UdpHeader {
            raw: &raw[..UDP_HEADER_LENGTH],
        })
    }

    pub(crate) fn new_unchecked(raw: &'a [u8]) -> Self {
        UdpHeader { raw }
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

    /// Length field, header included.
    pub fn length(&self) -> u16 {
        u16::from_be_bytes([self.raw[4], self.raw[5]])
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.raw[6], self.raw[7]])
    }

    pub fn header_length(&self) -> usize {
        UDP_HEADER_LENGTH
    }
}

impl fmt::Debug for UdpHeader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpHeader")
            .field("source_port", &self.source_port())
            .field("destination_port", &self.destination_port())
            .field("length", &self.length())
            .finish()
    }
}

pub struct UdpHeaderMut<'a> {
    raw: &'a mut [u8],
}

impl<'a> UdpHeaderMut<'a> {
    pub(crate) fn new_unchecked(raw: &'a mut [u8]) -> Self {
        UdpHeaderMut { raw }
    }

    pub fn view(&self) -> UdpHeader<'_> {
        UdpHeader::new_unchecked(self.raw)
    }

    pub fn swap_source_and_destination(&mut self) {
        let (source, destination) = self.raw[0..4].split_at_mut(2);
        source.swap_with_slice(destination);
    }

    pub fn set_payload_length(&mut self, payload_length: u16) {
        let length = UDP_HEADER_LENGTH as u16 + payload_length;
        self.raw[4..6].copy_from_slice(&length.to_be_bytes());
    }

    /// UDP checksums are optional over IPv4; the relay always sends 0 (disabled).
    pub fn compute_checksum(&mut self) {
        self.raw[6..8].copy_from_slice(&[0, 0]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_mutate() {
        let mut raw = vec![0x1f, 0x90, 0x00, 0x35, 0x00, 0x0c, 0xab, 0xcd, 1, 2, 3, 4];
        let header = UdpHeader::parse(&raw).unwrap();
        assert_eq!(header.source_port(), 8080);
        assert_eq!(header.destination_port(), 53);
        assert_eq!(header.length(), 12);
        assert_eq!(header.raw().len(), 8);

        let mut header = UdpHeaderMut::new_unchecked(&mut raw[..8]);
        header.swap_source_and_destination();
        header.set_payload_length(100);
        header.compute_checksum();
        let view = header.view();
        assert_eq!(view.source_port(), 53);
        assert_eq!(view.destination_port(), 8080);
        assert_eq!(view.length(), 108);
        assert_eq!(view.checksum(), 0);
    }

    #[test]
    fn test_truncated_header_rejected() {
        assert!(UdpHeader::parse(&[0u8; 7]).is_err());
    }
}
