// relayed flows, one per device-side five-tuple

pub mod id;
pub mod tcp;
pub mod udp;

use std::time::{Duration, Instant};

use tracing::info;

use crate::client::{ClientSink, PacketSource};
use crate::error::Result;
use crate::packet::{Ipv4Packet, Protocol};
use crate::selector::{Ready, Selector};

pub use id::ConnectionId;
pub use tcp::{TcpConnection, TcpState};
pub use udp::UdpConnection;

/// What a connection needs from its client while handling an event.
pub struct Context<'a> {
    pub selector: &'a mut Selector,
    pub sink: &'a mut ClientSink,
}

pub enum Connection {
    Tcp(TcpConnection),
    Udp(UdpConnection),
}

impl Connection {
    /// Open the connection for the first packet of a flow.
    ///
    /// The packet itself is not handled here, pass it to
    /// [`send_to_network`](Self::send_to_network) afterwards.
    pub fn create(
        id: ConnectionId,
        client_id: u32,
        reference: &Ipv4Packet,
        selector: &mut Selector,
        udp_idle_timeout: Duration,
    ) -> Result<Self> {
        let connection = match id.protocol() {
            Protocol::Tcp => Connection::Tcp(TcpConnection::new(id, client_id, reference)?),
            _ => Connection::Udp(UdpConnection::new(
                id,
                client_id,
                reference,
                selector,
                udp_idle_timeout,
            )?),
        };
        info!("Client #{}: {} Open", client_id, id);
        Ok(connection)
    }

    pub fn id(&self) -> ConnectionId {
        match self {
            Connection::Tcp(c) => c.id(),
            Connection::Udp(c) => c.id(),
        }
    }

    pub fn send_to_network(&mut self, cx: &mut Context<'_>, packet: &Ipv4Packet) {
        match self {
            Connection::Tcp(c) => c.send_to_network(cx, packet),
            Connection::Udp(c) => c.send_to_network(cx, packet),
        }
    }

    pub fn on_ready(&mut self, cx: &mut Context<'_>, ready: Ready) {
        match self {
            Connection::Tcp(c) => c.on_ready(cx, ready),
            Connection::Udp(c) => c.on_ready(cx, ready),
        }
    }

    /// Release the socket, without notifying the device.
    pub fn disconnect(&mut self, selector: &mut Selector) {
        match self {
            Connection::Tcp(c) => c.disconnect(selector),
            Connection::Udp(c) => c.disconnect(selector),
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        match self {
            Connection::Tcp(_) => false,
            Connection::Udp(c) => c.is_expired(now),
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            Connection::Tcp(c) => c.is_closed(),
            Connection::Udp(c) => c.is_closed(),
        }
    }

    pub fn as_packet_source(&mut self) -> &mut dyn PacketSource {
        match self {
            Connection::Tcp(c) => c,
            Connection::Udp(c) => c,
        }
    }
}
