// reassembles ipv4 packets from the raw tunnel byte stream

use std::io::{self, Read};

use tracing::warn;

use crate::error::{RelayError, Result};
use crate::packet::ipv4_header::{self, MIN_IPV4_HEADER_LENGTH};
use crate::packet::{Ipv4Packet, MAX_PACKET_LENGTH};

pub struct Ipv4PacketBuffer {
    buffer: Box<[u8]>,
    position: usize,
}

impl Default for Ipv4PacketBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Ipv4PacketBuffer {
    pub fn new() -> Self {
        Ipv4PacketBuffer {
            buffer: vec![0; MAX_PACKET_LENGTH].into_boxed_slice(),
            position: 0,
        }
    }

    /// Number of buffered bytes not yet returned as a packet.
    pub fn len(&self) -> usize {
        self.position
    }

    pub fn is_empty(&self) -> bool {
        self.position == 0
    }

    /// Read once from `source` into the free space.
    ///
    /// There is always free space as long as complete packets are drained with
    /// [`as_ipv4_packet`](Self::as_ipv4_packet) after every read: a pending
    /// partial packet is at most 65534 bytes long.
    pub fn read_from<R: Read>(&mut self, source: &mut R) -> io::Result<usize> {
        let r = source.read(&mut self.buffer[self.position..])?;
        self.position += r;
        Ok(r)
    }

    /// Extract the next complete packet, `Ok(None)` if more bytes are needed.
    ///
    /// Fails if the stream cannot be framed (not IPv4, or a total length
    /// smaller than a header). Packets with an unusable header but a sane
    /// length are consumed, logged and skipped.
    pub fn as_ipv4_packet(&mut self) -> Result<Option<Ipv4Packet>> {
        loop {
            let data = &self.buffer[..self.position];
            match ipv4_header::read_version(data) {
                None => return Ok(None),
                Some(4) => {}
                Some(version) => return Err(RelayError::UnsupportedVersion(version)),
            }
            let length = match ipv4_header::read_length(data) {
                None => return Ok(None),
                Some(length) => usize::from(length),
            };
            if length < MIN_IPV4_HEADER_LENGTH {
                return Err(RelayError::InvalidPacket(format!(
                    "Invalid IPv4 total length: {}",
                    length
                )));
            }
            if length > self.position {
                // no full packet available
                return Ok(None);
            }

            let raw = data[..length].to_vec();
            self.buffer.copy_within(length..self.position, 0);
            self.position -= length;

            match Ipv4Packet::parse(raw) {
                Ok(packet) => return Ok(Some(packet)),
                Err(err) => warn!("Dropping unparsable packet: {}", err),
            }
        }
    }
}
