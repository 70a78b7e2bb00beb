// circular buffer of length-prefixed datagrams
//
// every datagram is stored contiguously, preceded by its length on 16 bits
// (big-endian); the storage has MAX_BLOCK_LENGTH extra bytes after the
// circular area so that a block starting before its end never wraps

use std::io;

use crate::error::{RelayError, Result};

const HEADER_LENGTH: usize = 2;
pub const MAX_DATAGRAM_LENGTH: usize = 0xffff;
const MAX_BLOCK_LENGTH: usize = HEADER_LENGTH + MAX_DATAGRAM_LENGTH;

pub struct DatagramBuffer {
    data: Box<[u8]>,
    head: usize,
    tail: usize,
    circular_buffer_length: usize,
}

impl DatagramBuffer {
    pub fn new(capacity: usize) -> Self {
        DatagramBuffer {
            data: vec![0; capacity + MAX_BLOCK_LENGTH].into_boxed_slice(),
            head: 0,
            tail: 0,
            circular_buffer_length: capacity + 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn capacity(&self) -> usize {
        self.circular_buffer_length - 1
    }

    pub fn has_enough_space_for(&self, datagram_length: usize) -> bool {
        if datagram_length > MAX_DATAGRAM_LENGTH {
            return false;
        }
        let block_length = HEADER_LENGTH + datagram_length;
        if self.head >= self.tail {
            // the extra area always holds one block, but wrapping head to 0
            // must not make it catch up with the tail
            return self.head + block_length < self.circular_buffer_length || self.tail > 0;
        }
        // 1 extra byte to distinguish empty vs full
        let remaining = self.tail - self.head - 1;
        block_length <= remaining
    }

    /// Send the oldest datagram through `send`.
    ///
    /// On `WouldBlock` the datagram is kept for a later attempt; on any other
    /// outcome it is consumed. Returns whether it was sent entirely.
    pub fn write_to<F>(&mut self, send: F) -> io::Result<bool>
    where
        F: FnOnce(&[u8]) -> io::Result<usize>,
    {
        if self.is_empty() {
            return Ok(true);
        }
        let length = self.read_length();
        let start = self.tail + HEADER_LENGTH;
        let result = send(&self.data[start..start + length]);
        if let Err(ref e) = result {
            if e.kind() == io::ErrorKind::WouldBlock {
                return Err(io::ErrorKind::WouldBlock.into());
            }
        }
        self.tail = start + length;
        if self.tail >= self.circular_buffer_length {
            self.tail = 0;
        }
        self.optimize();
        result.map(|w| w == length)
    }

    /// Store one datagram; fails if it is too large or does not fit.
    pub fn read_from(&mut self, datagram: &[u8]) -> Result<()> {
        let length = datagram.len();
        if length > MAX_DATAGRAM_LENGTH {
            return Err(RelayError::DatagramTooLarge(length));
        }
        if !self.has_enough_space_for(length) {
            return Err(RelayError::BufferFull);
        }
        self.write_length(length as u16);
        self.data[self.head..self.head + length].copy_from_slice(datagram);
        self.head += length;
        if self.head >= self.circular_buffer_length {
            self.head = 0;
        }
        Ok(())
    }

    fn write_length(&mut self, length: u16) {
        self.data[self.head..self.head + HEADER_LENGTH].copy_from_slice(&length.to_be_bytes());
        self.head += HEADER_LENGTH;
    }

    fn read_length(&self) -> usize {
        usize::from(u16::from_be_bytes([
            self.data[self.tail],
            self.data[self.tail + 1],
        ]))
    }

    fn optimize(&mut self) {
        if self.is_empty() {
            self.head = 0;
            self.tail = 0;
        }
    }
}
