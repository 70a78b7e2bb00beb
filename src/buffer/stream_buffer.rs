// fixed-capacity circular byte buffer
//
// one slot is always left empty so that head == tail means "empty"

use std::io::{self, Write};

pub struct StreamBuffer {
    data: Box<[u8]>,
    head: usize,
    tail: usize,
}

impl StreamBuffer {
    pub fn new(capacity: usize) -> Self {
        StreamBuffer {
            data: vec![0; capacity + 1].into_boxed_slice(),
            head: 0,
            tail: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn is_full(&self) -> bool {
        (self.head + 1) % self.data.len() == self.tail
    }

    pub fn size(&self) -> usize {
        if self.head < self.tail {
            self.head + self.data.len() - self.tail
        } else {
            self.head - self.tail
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len() - 1
    }

    pub fn remaining(&self) -> usize {
        self.capacity() - self.size()
    }

    /// Flush as many buffered bytes as `sink` accepts, in at most two contiguous writes.
    ///
    /// Stops early on a short write or once the sink would block; `WouldBlock` is
    /// only returned if nothing at all could be written.
    pub fn write_to<W: Write>(&mut self, sink: &mut W) -> io::Result<usize> {
        let mut written = 0;
        while !self.is_empty() {
            let end = if self.head > self.tail {
                self.head
            } else {
                self.data.len()
            };
            let chunk = &self.data[self.tail..end];
            match sink.write(chunk) {
                Ok(0) => break,
                Ok(w) => {
                    written += w;
                    self.tail = (self.tail + w) % self.data.len();
                    if w < chunk.len() {
                        break;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock && written > 0 => break,
                Err(e) => return Err(e),
            }
        }
        self.optimize();
        Ok(written)
    }

    /// Append up to `remaining()` bytes of `source`, silently dropping the rest.
    ///
    /// Returns the number of bytes actually stored.
    pub fn read_from(&mut self, source: &[u8]) -> usize {
        let requested = source.len().min(self.remaining());
        let until_end = self.data.len() - self.head;
        if requested <= until_end {
            self.data[self.head..self.head + requested].copy_from_slice(&source[..requested]);
        } else {
            let (part1, part2) = source[..requested].split_at(until_end);
            self.data[self.head..].copy_from_slice(part1);
            self.data[..part2.len()].copy_from_slice(part2);
        }
        self.head = (self.head + requested) % self.data.len();
        requested
    }

    // reduce the chances of splitting the next write around the end of the buffer
    fn optimize(&mut self) {
        if self.is_empty() {
            self.head = 0;
            self.tail = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // a sink accepting at most `limit` bytes per call, then blocking once exhausted
    struct LimitedSink {
        out: Vec<u8>,
        budget: usize,
        per_call: usize,
    }

    impl Write for LimitedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.per_call).min(self.budget);
            self.out.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_empty_and_full() {
        let mut buffer = StreamBuffer::new(4);
        assert!(buffer.is_empty());
        assert!(!buffer.is_full());
        assert_eq!(buffer.remaining(), 4);

        assert_eq!(buffer.read_from(&[1, 2, 3, 4, 5, 6]), 4);
        assert!(buffer.is_full());
        assert_eq!(buffer.size(), 4);
        assert_eq!(buffer.remaining(), 0);
    }

    #[test]
    fn test_write_to_wraparound() {
        let mut buffer = StreamBuffer::new(8);
        buffer.read_from(&[1, 2, 3, 4, 5, 6]);

        let mut out = Vec::new();
        let mut sink = LimitedSink {
            out: Vec::new(),
            budget: 4,
            per_call: 4,
        };
        assert_eq!(buffer.write_to(&mut sink).unwrap(), 4);
        out.extend_from_slice(&sink.out);
        assert_eq!(buffer.size(), 2);

        // head is at 6, this write wraps around the end of the storage
        assert_eq!(buffer.read_from(&[7, 8, 9, 10, 11, 12]), 6);
        assert!(buffer.is_full());

        let mut all = Vec::new();
        assert_eq!(buffer.write_to(&mut all).unwrap(), 8);
        out.extend_from_slice(&all);
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_write_to_would_block() {
        let mut buffer = StreamBuffer::new(8);
        buffer.read_from(&[1, 2, 3]);
        let mut sink = LimitedSink {
            out: Vec::new(),
            budget: 0,
            per_call: 8,
        };
        let err = buffer.write_to(&mut sink).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert_eq!(buffer.size(), 3);
    }

    #[test]
    fn test_write_to_partial_then_block() {
        let mut buffer = StreamBuffer::new(8);
        buffer.read_from(&[1, 2, 3, 4, 5]);
        let mut sink = LimitedSink {
            out: Vec::new(),
            budget: 3,
            per_call: 2,
        };
        assert_eq!(buffer.write_to(&mut sink).unwrap(), 2);
        assert_eq!(sink.out, vec![1, 2]);
        assert_eq!(buffer.size(), 3);
    }

    #[test]
    fn test_fifo_interleaved() {
        // pseudo-random interleaving of reads and writes, never exceeding capacity
        let mut buffer = StreamBuffer::new(37);
        let mut expected = Vec::new();
        let mut actual = Vec::new();
        let mut next = 0u8;
        let mut seed = 7u32;
        for _ in 0..500 {
            seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
            let n = (seed >> 16) as usize % 20;
            if seed & 1 == 0 {
                let chunk: Vec<u8> = (0..n.min(buffer.remaining()))
                    .map(|_| {
                        next = next.wrapping_add(1);
                        next
                    })
                    .collect();
                assert_eq!(buffer.read_from(&chunk), chunk.len());
                expected.extend_from_slice(&chunk);
            } else {
                let mut sink = LimitedSink {
                    out: Vec::new(),
                    budget: n,
                    per_call: n.max(1),
                };
                let _ = buffer.write_to(&mut sink);
                actual.extend_from_slice(&sink.out);
            }
            assert_eq!(buffer.size() + buffer.remaining(), buffer.capacity());
            assert_eq!(buffer.is_empty(), buffer.size() == 0);
            assert_eq!(buffer.is_full(), buffer.remaining() == 0);
        }
        let mut rest = Vec::new();
        buffer.write_to(&mut rest).unwrap();
        actual.extend_from_slice(&rest);
        assert_eq!(actual, expected);
    }
}
