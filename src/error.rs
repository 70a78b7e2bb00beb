// error types shared across the relay

use std::net::SocketAddr;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// The tunnel stream does not start with an IPv4 header, it cannot be resynchronized
    #[error("Unsupported IP version: {0}")]
    UnsupportedVersion(u8),

    #[error("Datagram length ({0}) may not be greater than 65535 bytes")]
    DatagramTooLarge(usize),

    #[error("Buffer full")]
    BufferFull,

    #[error("Cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Capture error: {0}")]
    Capture(String),
}
