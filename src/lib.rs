// reverse tethering relay: terminates device ip traffic carried over a tcp
// tunnel and replays it through ordinary host sockets

pub mod binary;
pub mod buffer;
pub mod capture;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod packet;
pub mod packetizer;
pub mod relay;
pub mod router;
pub mod selector;
pub mod tunnel_server;

pub use config::{RelayConfig, DEFAULT_PORT};
pub use error::{RelayError, Result};
pub use relay::{EventLoop, Relay};
